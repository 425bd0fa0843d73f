//! Serve command - launch one server and follow its output.

use std::time::Duration;

use clap::Args;
use efx_server::{
    find_template, ManagerConfig, ModelType, ServerConfig, ServerManager, UpdateKind,
};

const EXIT_WAIT: Duration = Duration::from_secs(10);

#[derive(Args)]
pub(crate) struct ServeArgs {
    /// Model directory, or the directory holding the model when --template is set
    model_path: String,

    /// Start from a built-in template (see `efx-face templates`)
    #[arg(long)]
    template: Option<String>,

    /// Model type passed to the server
    #[arg(long)]
    model_type: Option<ModelType>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Host to bind
    #[arg(long)]
    host: Option<String>,

    /// Context length override
    #[arg(long)]
    context_length: Option<u32>,

    #[arg(long)]
    tool_call_parser: Option<String>,

    #[arg(long)]
    reasoning_parser: Option<String>,

    #[arg(long)]
    message_converter: Option<String>,

    /// Allow custom model code
    #[arg(long)]
    trust_remote_code: bool,

    /// Run the server in debug mode
    #[arg(long)]
    debug: bool,
}

impl ServeArgs {
    fn into_config(self) -> miette::Result<ServerConfig> {
        let mut config = match &self.template {
            Some(name) => {
                let template = find_template(name)
                    .ok_or_else(|| miette::miette!("Unknown template: {}", name))?;
                ServerConfig::from_template(template, &self.model_path)
            }
            None => ServerConfig::new(self.model_path.as_str()),
        };

        if let Some(model_type) = self.model_type {
            config = config.with_model_type(model_type);
        }
        if let Some(port) = self.port {
            config = config.with_port(port);
        }
        if let Some(host) = self.host {
            config = config.with_host(host);
        }
        if self.context_length.is_some() {
            config.context_length = self.context_length;
        }
        if self.tool_call_parser.is_some() {
            config.tool_call_parser = self.tool_call_parser;
        }
        if self.reasoning_parser.is_some() {
            config.reasoning_parser = self.reasoning_parser;
        }
        if self.message_converter.is_some() {
            config.message_converter = self.message_converter;
        }
        config.trust_remote_code |= self.trust_remote_code;
        config.debug |= self.debug;
        Ok(config)
    }
}

pub(crate) async fn run(args: ServeArgs) -> miette::Result<()> {
    let config = args.into_config()?;
    let (manager, mut updates) = ServerManager::new(ManagerConfig::from_env());

    let instance = manager
        .start(&config)
        .await
        .map_err(|e| miette::miette!("Failed to start server: {}", e))?;
    let port = instance.port();
    eprintln!("$ {}", instance.command_string());

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                eprintln!("\nStopping server on port {}...", port);
                manager
                    .stop_all()
                    .await
                    .map_err(|e| miette::miette!("Failed to stop servers: {}", e))?;
                break;
            }
            update = updates.recv() => {
                let Some(update) = update else { break };
                match update.kind {
                    UpdateKind::Started => {
                        eprintln!("Started {} on port {}", instance.model(), update.port);
                    }
                    UpdateKind::NewOutput => {
                        if let Some(line) = update.data {
                            println!("{}", line);
                        }
                    }
                    UpdateKind::Error => {
                        eprintln!("error: {}", update.data.unwrap_or_default());
                    }
                    UpdateKind::Stopped if update.port == port => {
                        eprintln!(
                            "Server on port {} stopped ({})",
                            port,
                            update.data.as_deref().unwrap_or("no exit status")
                        );
                        return Ok(());
                    }
                    UpdateKind::Stopped => {}
                }
            }
        }
    }

    // Wait for the exit report so the process is reaped before we return.
    let exited = tokio::time::timeout(EXIT_WAIT, async {
        while let Some(update) = updates.recv().await {
            if update.kind == UpdateKind::Stopped && update.port == port {
                break;
            }
        }
    })
    .await;
    if exited.is_err() {
        tracing::warn!("Server on port {} did not report exit within {:?}", port, EXIT_WAIT);
    }
    Ok(())
}
