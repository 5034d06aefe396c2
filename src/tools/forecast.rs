/// Weather prompts and the city completion
/// 
/// This module implements the get_forecast and get_weather_prompt prompts,
/// and suggests city names for the latter's `city` parameter.

use crate::domain::{PromptMessage, PromptResult};
use crate::registry::{HandlerError, Params};

/// Cities offered as completions
pub const KNOWN_CITIES: [&str; 5] = ["New York", "London", "Tokyo", "Sydney", "Beijing"];

/// Prompt asking for the general forecast
pub fn get_forecast(_params: Params) -> Result<PromptResult, HandlerError> {
    Ok(PromptResult::new(
        "Weather forecast prompt",
        vec![PromptMessage::user("What is the weather forecast like?")],
    ))
}

/// Prompt asking about the weather in one city
pub fn get_weather_prompt(params: Params) -> Result<PromptResult, HandlerError> {
    let city = params.str("city")?;
    Ok(PromptResult::new(
        "Weather prompt",
        vec![PromptMessage::user(format!("What is the weather like in {}?", city))],
    ))
}

/// Known cities starting with `partial`, ignoring case
pub fn complete_city(partial: &str) -> Result<Vec<String>, HandlerError> {
    let partial = partial.to_lowercase();
    Ok(KNOWN_CITIES
        .iter()
        .filter(|city| city.to_lowercase().starts_with(&partial))
        .map(|city| city.to_string())
        .collect())
}
