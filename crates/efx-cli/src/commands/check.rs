//! Check command - report installed tools and optionally probe a server.

use efx_chat::ChatClient;
use efx_server::detect::{self, Detection};

pub(crate) async fn run(port: Option<u16>) -> miette::Result<()> {
    print_detection("mlx-openai-server", &detect::detect_server());
    print_detection("huggingface-cli", &detect::detect_hf_cli());

    let missing = detect::missing_requirements();
    if !missing.is_empty() {
        println!();
        println!("Missing requirements:");
        for hint in &missing {
            println!("  - {}", hint);
        }
    }

    if let Some(port) = port {
        println!();
        let client = ChatClient::new(port);
        match client.check_connection().await {
            Ok(()) => println!("Server at {} is reachable", client.base_url()),
            Err(e) => return Err(miette::miette!("Server check failed: {}", e)),
        }
    }

    Ok(())
}

fn print_detection(name: &str, detection: &Detection) {
    match &detection.path {
        Some(path) if detection.installed => println!(
            "{:<18} {} ({})",
            name,
            path.display(),
            detection.version.as_deref().unwrap_or("unknown version")
        ),
        _ => println!("{:<18} not found", name),
    }
}
