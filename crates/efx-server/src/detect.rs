//! Detection of the external tools the manager depends on.

use std::path::PathBuf;
use std::process::Command;

use tracing::debug;

use crate::settings::SERVER_BINARY;

/// Whether a tool is installed and where.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Detection {
    pub installed: bool,
    pub path: Option<PathBuf>,
    pub version: Option<String>,
}

/// Look up `mlx-openai-server` on `PATH`.
pub fn detect_server() -> Detection {
    detect(SERVER_BINARY, &["--version"])
}

/// Look up `huggingface-cli`, falling back to the newer `hf` command.
pub fn detect_hf_cli() -> Detection {
    let detection = detect("huggingface-cli", &["version"]);
    if detection.installed {
        return detection;
    }
    detect("hf", &["version"])
}

/// Install hints for every required tool that is missing.
pub fn missing_requirements() -> Vec<String> {
    let mut missing = Vec::new();
    if !detect_server().installed {
        missing.push(format!("{} (pip install mlx-openai-server)", SERVER_BINARY));
    }
    if !detect_hf_cli().installed {
        missing.push("huggingface-cli (pip install huggingface_hub)".to_string());
    }
    missing
}

fn detect(binary: &str, version_args: &[&str]) -> Detection {
    let path = match which::which(binary) {
        Ok(path) => path,
        Err(e) => {
            debug!("{} not found on PATH: {}", binary, e);
            return Detection::default();
        }
    };

    let version = Command::new(&path)
        .args(version_args)
        .output()
        .ok()
        .filter(|output| output.status.success())
        .map(|output| String::from_utf8_lossy(&output.stdout).trim().to_string())
        .filter(|version| !version.is_empty());

    Detection {
        installed: true,
        path: Some(path),
        version,
    }
}
