/// Demonstration capabilities
/// 
/// The "weather" server shipped with the binary: one tool, two prompts and
/// a completion for the city parameter. External code can build its own
/// `HandlerRegistry` instead; this one is used by the binary and the tests.

pub mod forecast;
pub mod weather;

pub use forecast::*;
pub use weather::*;

use crate::registry::{HandlerRegistry, ParamSchema, ParamType, RegistryError};

/// Build the registry of the weather demonstration server
pub fn weather_registry() -> Result<HandlerRegistry, RegistryError> {
    let mut registry = HandlerRegistry::new();

    registry
        .register_tool(
            "get_weather",
            ParamSchema::new()
                .required("city", ParamType::String)
                .describe("City to look up"),
            get_weather,
        )
        .describe("Get the current weather for a city");

    registry
        .register_prompt("get_forecast", ParamSchema::new(), get_forecast)
        .describe("Weather forecast prompt");

    registry
        .register_prompt(
            "get_weather_prompt",
            ParamSchema::new()
                .required("city", ParamType::String)
                .describe("City the question is about"),
            get_weather_prompt,
        )
        .describe("Weather prompt");

    registry.register_completion("get_weather_prompt", "city", complete_city)?;

    Ok(registry)
}
