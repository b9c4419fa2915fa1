//! Policy rule management
//!
//! Rules send lookups for a destination, a source or a firewall mark into a
//! per-interface table. Duplicate adds are reported, not suppressed.

use crate::error::{RouteError, RuleOp};
use crate::routing::{IpFamily, PolicyRouter, RouteNetlink, Rule};
use ipnetwork::IpNetwork;
use tracing::{debug, error};

impl<K: RouteNetlink> PolicyRouter<K> {
    /// `ip rule add to <dst> lookup <table>`
    pub async fn add_destination_rule(
        &self,
        dst: IpNetwork,
        table: u32,
    ) -> Result<(), RouteError> {
        self.apply_rule(RuleOp::Add, Rule::destination(dst, table)).await
    }

    /// `ip rule del to <dst> lookup <table>`
    pub async fn delete_destination_rule(
        &self,
        dst: IpNetwork,
        table: u32,
    ) -> Result<(), RouteError> {
        self.apply_rule(RuleOp::Delete, Rule::destination(dst, table))
            .await
    }

    /// `ip rule add from <src> lookup <table>`
    pub async fn add_source_rule(&self, src: IpNetwork, table: u32) -> Result<(), RouteError> {
        self.apply_rule(RuleOp::Add, Rule::source(src, table)).await
    }

    /// `ip rule del from <src> lookup <table>`
    pub async fn delete_source_rule(&self, src: IpNetwork, table: u32) -> Result<(), RouteError> {
        self.apply_rule(RuleOp::Delete, Rule::source(src, table)).await
    }

    /// `ip rule add fwmark <mark> lookup <table> pref <priority>`
    ///
    /// `IpFamily::All` installs one rule per concrete family.
    pub async fn add_mark_rule(
        &self,
        mark: u32,
        table: u32,
        family: IpFamily,
    ) -> Result<(), RouteError> {
        for family in family.concrete() {
            let rule = Rule::mark(mark, table, *family, self.mark_rule_priority());
            self.apply_rule(RuleOp::Add, rule).await?;
        }
        Ok(())
    }

    pub async fn delete_mark_rule(
        &self,
        mark: u32,
        table: u32,
        family: IpFamily,
    ) -> Result<(), RouteError> {
        for family in family.concrete() {
            let rule = Rule::mark(mark, table, *family, self.mark_rule_priority());
            self.apply_rule(RuleOp::Delete, rule).await?;
        }
        Ok(())
    }

    pub async fn list_rules(&self, family: IpFamily) -> Result<Vec<Rule>, RouteError> {
        self.kernel()
            .rule_list(family)
            .await
            .map_err(RouteError::Query)
    }

    async fn apply_rule(&self, op: RuleOp, rule: Rule) -> Result<(), RouteError> {
        let result = match op {
            RuleOp::Add => self.kernel().rule_add(&rule).await,
            RuleOp::Delete => self.kernel().rule_del(&rule).await,
        };

        match result {
            Ok(()) => {
                debug!(%op, rule = %rule, "applied policy rule");
                Ok(())
            }
            Err(source) => {
                error!(%op, rule = %rule, error = %source, "policy rule operation failed");
                Err(RouteError::RuleOperationFailed {
                    op,
                    rule: rule.to_string(),
                    source,
                })
            }
        }
    }
}
