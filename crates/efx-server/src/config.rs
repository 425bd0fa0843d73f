//! Launch configuration for a single mlx-openai-server instance.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::templates::ModelTemplate;

/// Default port for a new server.
pub const DEFAULT_PORT: u16 = 8000;

/// Default bind address for a new server.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Kind of model a server hosts. Decides which type-specific flags apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModelType {
    #[default]
    Lm,
    Multimodal,
    ImageGeneration,
    ImageEdit,
    Embeddings,
    Whisper,
}

impl ModelType {
    pub const ALL: [ModelType; 6] = [
        ModelType::Lm,
        ModelType::Multimodal,
        ModelType::ImageGeneration,
        ModelType::ImageEdit,
        ModelType::Embeddings,
        ModelType::Whisper,
    ];

    /// The value passed to `--model-type`.
    pub fn as_str(self) -> &'static str {
        match self {
            ModelType::Lm => "lm",
            ModelType::Multimodal => "multimodal",
            ModelType::ImageGeneration => "image-generation",
            ModelType::ImageEdit => "image-edit",
            ModelType::Embeddings => "embeddings",
            ModelType::Whisper => "whisper",
        }
    }
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ModelType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| {
                let known: Vec<&str> = ModelType::ALL.iter().map(|t| t.as_str()).collect();
                format!("unknown model type '{}' (expected one of: {})", s, known.join(", "))
            })
    }
}

/// Everything needed to launch one server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Display name of the model.
    pub model: String,
    /// Directory passed to `--model-path`.
    pub model_path: String,
    pub model_type: ModelType,
    pub port: u16,
    pub host: String,

    // Language / multimodal options
    pub context_length: Option<u32>,
    pub tool_call_parser: Option<String>,
    pub reasoning_parser: Option<String>,
    pub message_converter: Option<String>,
    pub trust_remote_code: bool,
    pub debug: bool,
    pub disable_auto_resize: bool,
    pub chat_template_file: Option<String>,
    pub log_level: Option<String>,

    // Image generation / edit options
    pub config_name: Option<String>,
    pub quantize: Option<u32>,
    pub lora_paths: Option<String>,
    pub lora_scales: Option<String>,

    // Whisper / embeddings queue options
    pub max_concurrency: u32,
    pub queue_timeout: u32,
    pub queue_size: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            model: String::new(),
            model_path: String::new(),
            model_type: ModelType::Lm,
            port: DEFAULT_PORT,
            host: DEFAULT_HOST.to_string(),
            context_length: None,
            tool_call_parser: None,
            reasoning_parser: None,
            message_converter: None,
            trust_remote_code: false,
            debug: false,
            disable_auto_resize: false,
            chat_template_file: None,
            log_level: None,
            config_name: None,
            quantize: None,
            lora_paths: None,
            lora_scales: None,
            max_concurrency: 1,
            queue_timeout: 300,
            queue_size: 100,
        }
    }
}

impl ServerConfig {
    /// Create a config for a model directory, deriving the display name from
    /// the last path component.
    pub fn new(model_path: impl Into<String>) -> Self {
        let model_path = model_path.into();
        let model = model_path
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string();
        Self {
            model,
            model_path,
            ..Self::default()
        }
    }

    /// Build a config from a template whose model lives under `model_dir`.
    pub fn from_template(template: &ModelTemplate, model_dir: &str) -> Self {
        Self {
            model: template.model_name.to_string(),
            model_path: format!("{}/{}", model_dir.trim_end_matches('/'), template.model_name),
            model_type: template.model_type,
            port: template.port,
            host: template.host.to_string(),
            reasoning_parser: template.reasoning_parser.map(str::to_string),
            tool_call_parser: template.tool_call_parser.map(str::to_string),
            message_converter: template.message_converter.map(str::to_string),
            trust_remote_code: template.trust_remote_code,
            debug: template.debug,
            ..Self::default()
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_model_type(mut self, model_type: ModelType) -> Self {
        self.model_type = model_type;
        self
    }

    /// Command-line arguments for the server binary, in launch order.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = vec![
            "launch".to_string(),
            "--model-path".to_string(),
            self.model_path.clone(),
            "--model-type".to_string(),
            self.model_type.as_str().to_string(),
            "--port".to_string(),
            self.port.to_string(),
            "--host".to_string(),
            self.host.clone(),
        ];

        match self.model_type {
            ModelType::Lm | ModelType::Multimodal => {
                if let Some(len) = self.context_length.filter(|len| *len > 0) {
                    push_flag(&mut args, "--context-length", len.to_string());
                }
                push_opt(&mut args, "--tool-call-parser", &self.tool_call_parser);
                push_opt(&mut args, "--reasoning-parser", &self.reasoning_parser);
                push_opt(&mut args, "--message-converter", &self.message_converter);
                if self.trust_remote_code {
                    args.push("--trust-remote-code".to_string());
                }
                if self.debug {
                    args.push("--debug".to_string());
                }
                push_opt(&mut args, "--chat-template-file", &self.chat_template_file);
                if self.model_type == ModelType::Multimodal && self.disable_auto_resize {
                    args.push("--disable-auto-resize".to_string());
                }
            }
            ModelType::ImageGeneration | ModelType::ImageEdit => {
                push_opt(&mut args, "--config-name", &self.config_name);
                if let Some(bits) = self.quantize.filter(|bits| *bits > 0) {
                    push_flag(&mut args, "--quantize", bits.to_string());
                }
                push_opt(&mut args, "--lora-paths", &self.lora_paths);
                push_opt(&mut args, "--lora-scales", &self.lora_scales);
            }
            ModelType::Whisper | ModelType::Embeddings => {
                push_flag(&mut args, "--max-concurrency", self.max_concurrency.to_string());
                push_flag(&mut args, "--queue-timeout", self.queue_timeout.to_string());
                push_flag(&mut args, "--queue-size", self.queue_size.to_string());
            }
        }

        if let Some(level) = self.log_level.as_deref() {
            if !level.is_empty() && level != "INFO" {
                push_flag(&mut args, "--log-level", level.to_string());
            }
        }

        args
    }
}

fn push_flag(args: &mut Vec<String>, flag: &str, value: String) {
    args.push(flag.to_string());
    args.push(value);
}

fn push_opt(args: &mut Vec<String>, flag: &str, value: &Option<String>) {
    if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
        push_flag(args, flag, value.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::templates::find_template;

    #[test]
    fn test_base_args() {
        let config = ServerConfig::new("/models/Qwen3-8B").with_port(8001);
        assert_eq!(config.model, "Qwen3-8B");
        assert_eq!(
            config.build_args(),
            vec![
                "launch",
                "--model-path",
                "/models/Qwen3-8B",
                "--model-type",
                "lm",
                "--port",
                "8001",
                "--host",
                "0.0.0.0",
            ]
        );
    }

    #[test]
    fn test_lm_flags_in_order() {
        let config = ServerConfig {
            context_length: Some(8192),
            tool_call_parser: Some("qwen3".to_string()),
            reasoning_parser: Some(String::new()),
            trust_remote_code: true,
            debug: true,
            log_level: Some("DEBUG".to_string()),
            ..ServerConfig::new("/m/x")
        };
        let args = config.build_args();
        assert_eq!(
            &args[9..],
            &[
                "--context-length",
                "8192",
                "--tool-call-parser",
                "qwen3",
                "--trust-remote-code",
                "--debug",
                "--log-level",
                "DEBUG",
            ]
        );
    }

    #[test]
    fn test_disable_auto_resize_only_for_multimodal() {
        let mut config = ServerConfig {
            disable_auto_resize: true,
            ..ServerConfig::new("/m/x")
        };
        assert!(!config.build_args().contains(&"--disable-auto-resize".to_string()));
        config.model_type = ModelType::Multimodal;
        assert!(config.build_args().contains(&"--disable-auto-resize".to_string()));
    }

    #[test]
    fn test_queue_flags_for_whisper() {
        let config = ServerConfig::new("/m/whisper").with_model_type(ModelType::Whisper);
        let args = config.build_args();
        assert_eq!(
            &args[9..],
            &["--max-concurrency", "1", "--queue-timeout", "300", "--queue-size", "100"]
        );
    }

    #[test]
    fn test_image_flags_skip_unset() {
        let config = ServerConfig {
            quantize: Some(8),
            lora_paths: Some("a.safetensors".to_string()),
            context_length: Some(4096),
            ..ServerConfig::new("/m/flux").with_model_type(ModelType::ImageGeneration)
        };
        assert_eq!(
            &config.build_args()[9..],
            &["--quantize", "8", "--lora-paths", "a.safetensors"]
        );
    }

    #[test]
    fn test_info_log_level_is_omitted() {
        let config = ServerConfig {
            log_level: Some("INFO".to_string()),
            ..ServerConfig::new("/m/x")
        };
        assert_eq!(config.build_args().len(), 9);
    }

    #[test]
    fn test_model_type_round_trip_names() {
        assert_eq!("image-edit".parse::<ModelType>(), Ok(ModelType::ImageEdit));
        assert!("llm".parse::<ModelType>().is_err());
        assert_eq!(ModelType::Embeddings.to_string(), "embeddings");
    }

    #[test]
    fn test_from_template() {
        let template = find_template("Qwen3-VL-8B-Thinking-8bit").unwrap();
        let config = ServerConfig::from_template(template, "/Volumes/models/");
        assert_eq!(config.model_path, "/Volumes/models/Qwen3-VL-8B-Thinking-8bit");
        assert_eq!(config.model_type, ModelType::Multimodal);
        assert_eq!(config.port, DEFAULT_PORT);
    }
}
