//! Chat command - stream one answer from a running server.

use std::io::Write;

use efx_chat::{ChatClient, ChatMessage, StreamEvent};

pub(crate) async fn run(port: u16, model: Option<String>, prompt: &str) -> miette::Result<()> {
    let mut client = ChatClient::new(port);
    if let Some(model) = model {
        client = client.with_model(model);
    }

    client
        .check_connection()
        .await
        .map_err(|e| miette::miette!("Server on port {} is not ready: {}", port, e))?;

    let mut stream = client.stream_chat_completion(&[ChatMessage::user(prompt)]);
    let canceller = stream.canceller();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            canceller.cancel();
        }
    });

    let mut stdout = std::io::stdout();
    let mut wrote_any = false;
    while let Some(event) = stream.recv().await {
        match event {
            StreamEvent::Delta(text) => {
                wrote_any = true;
                print!("{}", text);
                stdout.flush().ok();
            }
            StreamEvent::Failed(e) => {
                if wrote_any {
                    println!("\n\n[Stream interrupted]");
                }
                return Err(miette::miette!("Chat failed: {}", e));
            }
            StreamEvent::Finished => break,
        }
    }
    println!();
    Ok(())
}
