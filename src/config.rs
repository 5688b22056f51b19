use crate::error::Error;

/// Tunables shared by every connection of a server. Set before `listen`,
/// read-only afterwards.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Size of the buffer handed to each socket read. Has to cover the
    /// largest single frame a peer is expected to send.
    pub read_buffer_size: usize,
    /// Upper bound on one assembled message, fragments included.
    pub max_message_size: usize,
    /// Negotiate permessage-deflate and compress outgoing data frames.
    pub compression: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            read_buffer_size: 65535,
            max_message_size: u32::MAX as usize,
            compression: false,
        }
    }
}

impl ServerConfig {
    /// Rejects combinations the engine cannot honor. Runs once at the top
    /// of `listen`.
    pub(crate) fn validate(&self) -> Result<(), Error> {
        if self.read_buffer_size > self.max_message_size {
            return Err(Error::InvalidConfig(
                self.read_buffer_size,
                self.max_message_size,
            ));
        }
        if self.read_buffer_size > 65535 && cfg!(not(target_pointer_width = "64")) {
            return Err(Error::ReadBufferRequires64Bit);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.read_buffer_size, 65535);
        assert_eq!(config.max_message_size, u32::MAX as usize);
        assert!(!config.compression);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_read_buffer_capped_by_message_size() {
        let config = ServerConfig {
            read_buffer_size: 2048,
            max_message_size: 1024,
            compression: false,
        };
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidConfig(2048, 1024))
        ));
    }
}
