//! Destination that prints delivered events to stdout

use async_trait::async_trait;
use beacon_core::{Context, Phase, Plugin, Result};

/// Writes one `<destination>\t<event json>` line per delivered event.
pub struct ConsoleDestination {
    name: String,
}

impl ConsoleDestination {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Plugin for ConsoleDestination {
    fn name(&self) -> &str {
        &self.name
    }

    fn phase(&self) -> Phase {
        Phase::Destination
    }

    async fn process(&self, ctx: &mut Context) -> Result<()> {
        let line = serde_json::to_string(&ctx.event)?;
        println!("{}\t{}", self.name, line);
        Ok(())
    }
}
