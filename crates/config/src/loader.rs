use std::path::Path;

use crate::Config;

pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let content = std::fs::read_to_string(path.as_ref())?;
    let config: Config = toml::from_str(&content)?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use indoc::indoc;

    use crate::{Config, StorageBackend};

    #[test]
    fn loads_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();

        file.write_all(
            indoc! {r#"
                [server]
                listen_address = "127.0.0.1:9000"

                [rate_limits.ip]
                limit = 5
                window = "60s"

                [rate_limits.storage]
                backend = "memory"
            "#}
            .as_bytes(),
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();

        assert_eq!(config.server.listen_address.unwrap().port(), 9000);
        assert_eq!(config.rate_limits.ip.limit, 5);
        assert!(matches!(
            config.rate_limits.storage.backend,
            StorageBackend::Memory
        ));
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = Config::load("/definitely/not/here.toml");
        assert!(err.is_err());
    }
}
