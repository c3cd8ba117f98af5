//! Placeholder backend for zones with no real media backend configured.
//! Never reports connected; every command is accepted and discarded.

use async_trait::async_trait;

use super::{Backend, BackendKind, CommandParam};
use crate::error::Result;

pub struct NullBackend;

impl NullBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for NullBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backend for NullBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Null
    }

    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn send_command(&self, _command: &str, _param: CommandParam) -> Result<()> {
        Ok(())
    }

    async fn send_group_command(
        &self,
        _command: &str,
        _group_type: &str,
        _leader: &str,
        _others: &[String],
    ) -> Result<()> {
        Ok(())
    }

    async fn cleanup(&self) {}
}
