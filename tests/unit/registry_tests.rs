/// Handler registry and parameter schema tests
use mcp_relay::registry::{HandlerFn, ValidationError};
use mcp_relay::tools::{complete_city, weather_registry};
use mcp_relay::*;
use serde_json::{json, Map, Value};

fn params(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

#[cfg(test)]
mod registry_unit_tests {
    use super::*;

    #[test]
    fn test_last_registration_wins() {
        let mut registry = HandlerRegistry::new();
        registry.register_tool("version", ParamSchema::new(), |_| Ok(1));
        registry.register_tool("version", ParamSchema::new(), |_| Ok(2));

        let descriptor = registry.resolve(CapabilityKind::Tool, "version").unwrap();
        assert_eq!(descriptor.call(Params::default()).unwrap(), json!(2));
        assert_eq!(registry.list(CapabilityKind::Tool).len(), 1);
    }

    #[test]
    fn test_tools_and_prompts_are_separate_namespaces() {
        let mut registry = HandlerRegistry::new();
        registry.register_tool("weather", ParamSchema::new(), |_| Ok("tool"));
        registry.register_prompt("weather", ParamSchema::new(), |_| Ok("prompt"));

        let tool = registry.resolve(CapabilityKind::Tool, "weather").unwrap();
        let prompt = registry.resolve(CapabilityKind::Prompt, "weather").unwrap();
        assert_eq!(tool.call(Params::default()).unwrap(), json!("tool"));
        assert_eq!(prompt.call(Params::default()).unwrap(), json!("prompt"));
    }

    #[test]
    fn test_unknown_capability() {
        let registry = weather_registry().unwrap();
        let err = registry.resolve(CapabilityKind::Tool, "get_tides").unwrap_err();
        assert!(matches!(err, RegistryError::NotFound { .. }));
        assert!(registry.resolve(CapabilityKind::Tool, "get_forecast").is_err());
    }

    #[test]
    fn test_completion_needs_declared_parameter() {
        let mut registry = weather_registry().unwrap();

        let err = registry
            .register_completion("get_weather_prompt", "country", |_| Ok(vec![]))
            .unwrap_err();
        assert!(matches!(err, RegistryError::UnknownParameter { .. }));

        let err = registry
            .register_completion("get_tides", "city", |_| Ok(vec![]))
            .unwrap_err();
        assert!(matches!(err, RegistryError::NotFound { .. }));
    }

    #[test]
    fn test_city_completion() {
        let registry = weather_registry().unwrap();
        let complete = registry.resolve_completion("get_weather_prompt", "city").unwrap();

        assert_eq!(complete("Lo").unwrap(), vec!["London".to_string()]);
        assert_eq!(complete("new").unwrap(), vec!["New York".to_string()]);
        assert_eq!(complete_city("S").unwrap(), vec!["Sydney".to_string()]);
        assert!(registry.resolve_completion("get_forecast", "city").is_err());
    }

    #[test]
    fn test_reregistered_prompt_loses_stale_completion() {
        let mut registry = HandlerRegistry::new();
        registry.register_prompt("p", ParamSchema::new().required("city", ParamType::String), |_| Ok("by city"));
        registry.register_completion("p", "city", complete_city).unwrap();
        assert_eq!(registry.completable_params("p"), vec!["city"]);

        registry.register_prompt("p", ParamSchema::new().required("country", ParamType::String), |_| Ok("by country"));

        let err = registry.resolve_completion("p", "city").err().unwrap();
        assert!(matches!(err, RegistryError::CompletionNotFound { .. }));
        assert!(registry.completable_params("p").is_empty());
    }

    #[test]
    fn test_completion_kind_is_stored_as_prompt() {
        let mut registry = HandlerRegistry::new();
        let handler: HandlerFn = std::sync::Arc::new(|_: Params| -> Result<Value, HandlerError> { Ok(json!("rendered")) });
        registry.register(CapabilityKind::Completion, "p".to_string(), ParamSchema::new(), handler);

        let descriptor = registry.resolve(CapabilityKind::Prompt, "p").unwrap();
        assert_eq!(descriptor.kind, CapabilityKind::Prompt);
        assert_eq!(descriptor.call(Params::default()).unwrap(), json!("rendered"));
    }

    #[test]
    fn test_bind_drops_undeclared_parameters() {
        let schema = ParamSchema::new()
            .required("city", ParamType::String)
            .optional("days", ParamType::Integer);

        let binding = schema
            .bind(params(json!({"city": "Paris", "units": "metric", "debug": true})))
            .unwrap();

        assert_eq!(binding.params.str("city").unwrap(), "Paris");
        assert!(!binding.params.contains("units"));
        assert_eq!(binding.ignored, vec!["debug".to_string(), "units".to_string()]);
        assert_eq!(binding.params.optional::<i64>("days").unwrap(), None);
    }

    #[test]
    fn test_bind_reports_problems() {
        let schema = ParamSchema::new()
            .required("city", ParamType::String)
            .optional("days", ParamType::Integer);

        assert_eq!(
            schema.bind(params(json!({"days": 3}))).unwrap_err(),
            ValidationError::Missing("city".to_string())
        );

        let err = schema
            .bind(params(json!({"city": "Paris", "days": "3"})))
            .unwrap_err();
        assert!(matches!(err, ValidationError::WrongType { ref name, .. } if name == "days"));

        // null means absent for optional parameters
        assert!(schema.bind(params(json!({"city": "Paris", "days": null}))).is_ok());
    }

    #[test]
    fn test_schema_rendering() {
        let schema = ParamSchema::new()
            .required("city", ParamType::String)
            .describe("City to look up")
            .optional("days", ParamType::Integer);

        assert_eq!(
            schema.to_json_schema(),
            json!({
                "type": "object",
                "properties": {
                    "city": {"type": "string", "description": "City to look up"},
                    "days": {"type": "integer"}
                },
                "required": ["city"]
            })
        );
    }
}
