/// Tool reporting the weather for a city
/// 
/// This module implements the get_weather tool.

use crate::registry::{HandlerError, Params};

/// Report the weather for `city`
///
/// Always sunny: the demo has no weather source behind it.
pub fn get_weather(params: Params) -> Result<String, HandlerError> {
    let city = params.str("city")?;
    tracing::debug!("Weather requested for {}", city);
    Ok("sunny".to_string())
}
