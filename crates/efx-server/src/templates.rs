//! Built-in launch presets for models known to work with mlx-openai-server.

use crate::config::{ModelType, DEFAULT_HOST, DEFAULT_PORT};

/// A predefined model configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelTemplate {
    pub name: &'static str,
    pub model_name: &'static str,
    pub model_type: ModelType,
    pub reasoning_parser: Option<&'static str>,
    pub tool_call_parser: Option<&'static str>,
    pub message_converter: Option<&'static str>,
    pub trust_remote_code: bool,
    pub debug: bool,
    pub port: u16,
    pub host: &'static str,
    /// Short capability summary shown next to the name.
    pub description: &'static str,
}

static TEMPLATES: [ModelTemplate; 4] = [
    ModelTemplate {
        name: "GLM-4.7-Flash-8bit",
        model_name: "GLM-4.7-Flash-8bit",
        model_type: ModelType::Lm,
        reasoning_parser: Some("glm47_flash"),
        tool_call_parser: Some("glm4_moe"),
        message_converter: Some("glm4_moe"),
        trust_remote_code: false,
        debug: true,
        port: DEFAULT_PORT,
        host: DEFAULT_HOST,
        description: "reasoning+tools",
    },
    ModelTemplate {
        name: "Qwen3-Coder-30B-A3B-Instruct-8bit",
        model_name: "Qwen3-Coder-30B-A3B-Instruct-8bit",
        model_type: ModelType::Lm,
        reasoning_parser: None,
        tool_call_parser: Some("qwen3_coder"),
        message_converter: Some("qwen3_coder"),
        trust_remote_code: false,
        debug: false,
        port: DEFAULT_PORT,
        host: DEFAULT_HOST,
        description: "code+tools",
    },
    ModelTemplate {
        name: "NVIDIA-Nemotron-3-Nano-30B-A3B-MLX-8Bit",
        model_name: "NVIDIA-Nemotron-3-Nano-30B-A3B-MLX-8Bit",
        model_type: ModelType::Lm,
        reasoning_parser: None,
        tool_call_parser: Some("qwen3"),
        message_converter: Some("nemotron3_nano"),
        trust_remote_code: true,
        debug: false,
        port: DEFAULT_PORT,
        host: DEFAULT_HOST,
        description: "tools",
    },
    ModelTemplate {
        name: "Qwen3-VL-8B-Thinking-8bit",
        model_name: "Qwen3-VL-8B-Thinking-8bit",
        model_type: ModelType::Multimodal,
        reasoning_parser: None,
        tool_call_parser: None,
        message_converter: None,
        trust_remote_code: false,
        debug: false,
        port: DEFAULT_PORT,
        host: DEFAULT_HOST,
        description: "vision+thinking",
    },
];

/// All built-in templates.
pub fn default_templates() -> &'static [ModelTemplate] {
    &TEMPLATES
}

/// Look up a template by its exact name.
pub fn find_template(name: &str) -> Option<&'static ModelTemplate> {
    TEMPLATES.iter().find(|t| t.name == name)
}
