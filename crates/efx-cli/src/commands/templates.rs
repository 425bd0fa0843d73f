//! Templates command - list the built-in model presets.

use efx_server::default_templates;

pub(crate) fn run() -> miette::Result<()> {
    for template in default_templates() {
        println!("{}", template.name);
        println!("  {}", template.description);
        println!(
            "  type: {}  port: {}  host: {}",
            template.model_type, template.port, template.host
        );
        if let Some(parser) = template.reasoning_parser {
            println!("  reasoning parser: {}", parser);
        }
        if let Some(parser) = template.tool_call_parser {
            println!("  tool call parser: {}", parser);
        }
        if let Some(converter) = template.message_converter {
            println!("  message converter: {}", converter);
        }
        println!();
    }
    Ok(())
}
