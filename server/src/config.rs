use std::{fs, io, path::Path};

/// Server configuration, loaded from a flat `key = "value"` text file.
#[derive(Debug, Clone)]
pub struct Config {
    address: String,
    map_height: i64,
    map_width: i64,
    waiting_capacity: usize,
    helped_capacity: usize,
    drone_capacity: usize,
    observer_capacity: usize,
    status_update_interval_secs: u64,
    heartbeat_interval_secs: u64,
    liveness_timeout_secs: u64,
    dispatch_interval_millis: u64,
    generator_min_interval_secs: u64,
    generator_max_interval_secs: u64,
    observer_publish_interval_millis: u64,
    log_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            address: "127.0.0.1:8080".to_string(),
            map_height: 100,
            map_width: 100,
            waiting_capacity: 100,
            helped_capacity: 500,
            drone_capacity: 50,
            observer_capacity: 10,
            status_update_interval_secs: 5,
            heartbeat_interval_secs: 10,
            liveness_timeout_secs: 30,
            dispatch_interval_millis: 1000,
            generator_min_interval_secs: 1,
            generator_max_interval_secs: 3,
            observer_publish_interval_millis: 40,
            log_file: "server.log".to_string(),
        }
    }
}

impl Config {
    /// Reads configuration directives from a file, falling back to defaults
    /// for any key not present. Blank lines and lines starting with `#` are
    /// ignored.
    pub fn from_file(path: &Path) -> io::Result<Self> {
        let content = fs::read_to_string(path)?;
        let mut config = Config::default();

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let parts: Vec<&str> = line.splitn(2, '=').map(|s| s.trim()).collect();
            if parts.len() != 2 {
                continue;
            }
            let value = parts[1].trim_matches('"');
            match parts[0] {
                "address" => config.address = value.to_string(),
                "map_height" => config.map_height = parse_field(value, "map_height")?,
                "map_width" => config.map_width = parse_field(value, "map_width")?,
                "waiting_capacity" => {
                    config.waiting_capacity = parse_field(value, "waiting_capacity")?
                }
                "helped_capacity" => {
                    config.helped_capacity = parse_field(value, "helped_capacity")?
                }
                "drone_capacity" => config.drone_capacity = parse_field(value, "drone_capacity")?,
                "observer_capacity" => {
                    config.observer_capacity = parse_field(value, "observer_capacity")?
                }
                "status_update_interval_secs" => {
                    config.status_update_interval_secs =
                        parse_field(value, "status_update_interval_secs")?
                }
                "heartbeat_interval_secs" => {
                    config.heartbeat_interval_secs = parse_field(value, "heartbeat_interval_secs")?
                }
                "liveness_timeout_secs" => {
                    config.liveness_timeout_secs = parse_field(value, "liveness_timeout_secs")?
                }
                "dispatch_interval_millis" => {
                    config.dispatch_interval_millis =
                        parse_field(value, "dispatch_interval_millis")?
                }
                "generator_min_interval_secs" => {
                    config.generator_min_interval_secs =
                        parse_field(value, "generator_min_interval_secs")?
                }
                "generator_max_interval_secs" => {
                    config.generator_max_interval_secs =
                        parse_field(value, "generator_max_interval_secs")?
                }
                "observer_publish_interval_millis" => {
                    config.observer_publish_interval_millis =
                        parse_field(value, "observer_publish_interval_millis")?
                }
                "log_file" => config.log_file = value.to_string(),
                _ => {}
            }
        }

        Ok(config)
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn map_height(&self) -> i64 {
        self.map_height
    }

    pub fn map_width(&self) -> i64 {
        self.map_width
    }

    pub fn waiting_capacity(&self) -> usize {
        self.waiting_capacity
    }

    pub fn helped_capacity(&self) -> usize {
        self.helped_capacity
    }

    pub fn drone_capacity(&self) -> usize {
        self.drone_capacity
    }

    pub fn observer_capacity(&self) -> usize {
        self.observer_capacity
    }

    pub fn status_update_interval_secs(&self) -> u64 {
        self.status_update_interval_secs
    }

    pub fn heartbeat_interval_secs(&self) -> u64 {
        self.heartbeat_interval_secs
    }

    pub fn liveness_timeout_secs(&self) -> u64 {
        self.liveness_timeout_secs
    }

    pub fn dispatch_interval_millis(&self) -> u64 {
        self.dispatch_interval_millis
    }

    pub fn generator_interval_range_secs(&self) -> (u64, u64) {
        (self.generator_min_interval_secs, self.generator_max_interval_secs)
    }

    pub fn observer_publish_interval_millis(&self) -> u64 {
        self.observer_publish_interval_millis
    }

    pub fn log_file(&self) -> &str {
        &self.log_file
    }
}

fn parse_field<T: std::str::FromStr>(value: &str, field: &str) -> io::Result<T> {
    value
        .parse()
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, format!("invalid {}", field)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp_config(name: &str, contents: &str) -> std::path::PathBuf {
        let mut path = std::env::temp_dir();
        path.push(name);
        let mut f = fs::File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.address(), "127.0.0.1:8080");
        assert_eq!(config.drone_capacity(), 50);
    }

    #[test]
    fn test_from_file_overrides_defaults() {
        let path = write_temp_config(
            "server_config_test_overrides.conf",
            "address = \"0.0.0.0:9000\"\n# a comment\nmap_height = 50\nmap_width = 50\n",
        );
        let config = Config::from_file(&path).unwrap();
        fs::remove_file(&path).unwrap();

        assert_eq!(config.address(), "0.0.0.0:9000");
        assert_eq!(config.map_height(), 50);
        assert_eq!(config.map_width(), 50);
        assert_eq!(config.drone_capacity(), 50);
    }

    #[test]
    fn test_from_file_rejects_invalid_numeric() {
        let path = write_temp_config(
            "server_config_test_invalid.conf",
            "map_height = \"not-a-number\"\n",
        );
        let result = Config::from_file(&path);
        fs::remove_file(&path).unwrap();

        assert!(result.is_err());
    }
}
