#[cfg(feature = "serde")]
mod serde_tests {
    use echo_prompt::{
        AstNode, ContentBlock, Context, Echo, EchoConfig, EchoError, EchoInterface,
        OperatorArgument, Template, parse,
    };
    use serde_json::json;

    #[test]
    fn test_context_serialization() {
        let mut context = Context::new();
        context
            .insert("name", "John")
            .insert("active", true)
            .insert("tags", json!(["a", "b"]));

        let serialized = serde_json::to_value(&context).unwrap();
        assert_eq!(
            serialized,
            json!({"name": "John", "active": true, "tags": ["a", "b"]})
        );

        let deserialized: Context = serde_json::from_value(serialized).unwrap();
        assert_eq!(deserialized, context);
    }

    #[test]
    fn test_config_deserialization_fills_defaults() {
        let config: EchoConfig = serde_json::from_str(r#"{"strict": true}"#).unwrap();
        assert_eq!(config, EchoConfig::default().strict(true));

        let config: EchoConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, EchoConfig::default());
    }

    #[test]
    fn test_content_block_shape() {
        let blocks = vec![
            ContentBlock::Text {
                text: "Describe:".to_owned(),
            },
            ContentBlock::Image {
                url: "data:image/png;base64,AAAA".to_owned(),
            },
        ];
        assert_eq!(
            serde_json::to_value(&blocks).unwrap(),
            json!([
                {"type": "text", "text": "Describe:"},
                {"type": "image", "url": "data:image/png;base64,AAAA"}
            ])
        );
    }

    #[test]
    fn test_template_serialization() {
        let template = Template::parse("Hello, {{ name }}!").unwrap();

        let serialized = serde_json::to_string(&template).unwrap();
        assert_eq!(serialized, r#"{"source":"Hello, {{ name }}!"}"#);

        let deserialized: Template = serde_json::from_str(&serialized).unwrap();
        assert_eq!(deserialized, template);

        let engine = Echo::new();
        let mut context = Context::new();
        context.insert("name", "World");
        let original = futures::executor::block_on(engine.render_template(&template, &context));
        let restored = futures::executor::block_on(engine.render_template(&deserialized, &context));
        assert_eq!(original.unwrap(), "Hello, World!");
        assert_eq!(restored.unwrap(), "Hello, World!");
    }

    #[test]
    fn test_invalid_template_fails_to_deserialize() {
        let result: Result<Template, _> = serde_json::from_str(r#"{"source":"[#IF {{x}}"}"#);
        let error = result.unwrap_err();
        assert!(error.to_string().contains("Failed to parse template"));
    }

    #[test]
    fn test_ast_round_trip() {
        let ast = parse("[#IF {{tier}} #one_of(gold, silver)]VIP {{name}}[END IF]")
            .into_result()
            .unwrap();
        let serialized = serde_json::to_string(&ast).unwrap();
        let deserialized: Vec<AstNode> = serde_json::from_str(&serialized).unwrap();
        assert_eq!(deserialized, ast);

        let AstNode::Conditional(conditional) = &deserialized[0] else {
            panic!("expected a conditional");
        };
        assert_eq!(
            conditional.condition.argument,
            Some(OperatorArgument::List(vec![
                "gold".to_owned(),
                "silver".to_owned()
            ]))
        );
    }

    #[test]
    fn test_errors_serialize() {
        let engine = Echo::new().with_config(EchoConfig::default().strict(true));
        let error = futures::executor::block_on(engine.render("{{missing}}", &Context::new()))
            .unwrap_err();
        let serialized = serde_json::to_value(&error).unwrap();
        assert_eq!(
            serialized,
            json!({"UndefinedVariable": {"path": "missing"}})
        );
        let deserialized: EchoError = serde_json::from_value(serialized).unwrap();
        assert_eq!(deserialized, error);

        let result = engine.parse("[#IF {{x}} #exists]");
        let serialized = serde_json::to_value(&result).unwrap();
        assert_eq!(serialized["success"], json!(false));
        assert_eq!(serialized["errors"][0]["line"], json!(1));
    }
}
