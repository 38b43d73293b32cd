use super::*;
use std::fs;
use tempfile::TempDir;

#[cfg(test)]
mod integration_tests {
    use super::*;

    #[test]
    fn config_file_persistence() {
        let temp_dir = TempDir::new().expect("should create TempDir successfully");
        let config_path = temp_dir.path().join("config.toml");

        let original_config = Config {
            ollama: OllamaConfig {
                protocol: "https".to_string(),
                host: "test-host".to_string(),
                port: 8080,
                embedding_model: "test-embed".to_string(),
                generation_model: "test-chat".to_string(),
                batch_size: 32,
                embedding_dimension: Some(384),
                timeout_seconds: 30,
                retry_attempts: 2,
            },
            ..Config::default()
        };

        let toml_content = toml::to_string_pretty(&original_config)
            .expect("config should convert to toml string successfully");
        fs::write(&config_path, toml_content).expect("should write to config_path successfully");

        let content =
            fs::read_to_string(&config_path).expect("should read from config_path successfully");
        let loaded_config: Config = toml::from_str(&content).expect("should parse toml correctly");

        assert_eq!(original_config, loaded_config);
    }

    #[test]
    fn invalid_toml_handling() {
        let invalid_toml = r#"
            [ollama
            host = "localhost"
            port = "invalid_port"
        "#;

        let result: Result<Config, toml::de::Error> = toml::from_str(invalid_toml);
        assert!(result.is_err());
    }

    #[test]
    fn wrong_field_type_is_rejected() {
        let invalid_toml = r#"
            [ollama]
            port = "not-a-number"
        "#;

        let result: Result<Config, toml::de::Error> = toml::from_str(invalid_toml);
        assert!(result.is_err());
    }

    #[test]
    fn complete_valid_config() {
        let valid_toml = r#"
            chunking = { strategy = "line" }

            [ollama]
            protocol = "http"
            host = "localhost"
            port = 11434
            embedding_model = "nomic-embed-text"
            generation_model = "phi3"
            batch_size = 64
            timeout_seconds = 60
            retry_attempts = 1

            [generation]
            temperature = 0.3
            max_tokens = 100

            [retrieval]
            collection = "code_files"
            top_k = 5

            [session]
            ttl_seconds = 600
            max_turns = 8
        "#;

        let config: Config = toml::from_str(valid_toml).expect("should parse toml successfully");
        assert_eq!(config.ollama.generation_model, "phi3");
        assert_eq!(config.ollama.batch_size, 64);
        assert_eq!(config.generation.max_tokens, Some(100));
        assert_eq!(config.retrieval.collection, "code_files");
        assert_eq!(config.session.max_turns, 8);
        assert_eq!(config.chunking, crate::chunking::ChunkStrategy::Line);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn ollama_url_generation_with_different_hosts() {
        let configs = vec![
            ("http", "localhost", 11434, "http://localhost:11434/"),
            ("http", "127.0.0.1", 8080, "http://127.0.0.1:8080/"),
            (
                "https",
                "secure.example.com",
                443,
                "https://secure.example.com/",
            ),
        ];

        for (protocol, host, port, expected_url) in configs {
            let config = Config {
                ollama: OllamaConfig {
                    protocol: protocol.to_string(),
                    host: host.to_string(),
                    port,
                    ..OllamaConfig::default()
                },
                ..Config::default()
            };

            let url = config.ollama_url().expect("ollama_url is ok");
            assert_eq!(url.as_str(), expected_url);
        }
    }

    #[test]
    fn derived_paths_live_under_base_dir() {
        let temp_dir = TempDir::new().expect("should create TempDir successfully");
        let config = Config::with_base_dir(temp_dir.path());

        assert!(config.database_path().starts_with(temp_dir.path()));
        assert!(config.vector_database_path().starts_with(temp_dir.path()));
        assert!(config.repository_cache_path().starts_with(temp_dir.path()));
        assert_ne!(config.vector_database_path(), config.repository_cache_path());
    }
}
