use crate::errors::AppResult;
use crate::models::{AppSettings, LinkTargetPreference};

pub trait Preferences: Send + Sync + 'static {
    fn link_target(&self) -> AppResult<LinkTargetPreference>;
}

impl Preferences for AppSettings {
    fn link_target(&self) -> AppResult<LinkTargetPreference> {
        Ok(self.link_target)
    }
}
