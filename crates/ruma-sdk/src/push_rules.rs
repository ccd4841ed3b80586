//! Push-rule toggling.
//!
//! Reading and editing the full push-rule tree is out of scope for this crate's [`MatrixApi`]
//! boundary (see the module docs on [`crate`]); the one operation a client commonly needs —
//! muting or unmuting a single rule — is exposed directly here.

use crate::{client::Client, error::Error};

impl Client {
    /// Enables or disables one push rule, e.g. to mute a room
    /// (`scope: "global", kind: "room", rule_id: "!room:example.org"`).
    pub async fn set_push_rule_enabled(
        &self,
        scope: &str,
        kind: &str,
        rule_id: &str,
        enabled: bool,
    ) -> Result<(), Error> {
        self.inner().api.enable_push_rule(scope, kind, rule_id, enabled).await?;
        Ok(())
    }
}
