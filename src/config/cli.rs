//! Command-line argument parsing

use crate::config::env::parse_list;
use crate::config::AppConfig;
use crate::error::ConfigError;
use crate::routing::{parse_network, IpFamily, Scope};
use clap::{Args, Parser, Subcommand};
use ipnetwork::IpNetwork;
use std::net::{Ipv4Addr, Ipv6Addr};

/// Command-line arguments structure
#[derive(Parser, Debug)]
#[command(name = "netns-policy-routing")]
#[command(about = "Per-interface policy routing for container network namespaces")]
#[command(version)]
pub struct CliArgs {
    /// Configuration file path
    #[arg(short, long, global = true, help = "Path to TOML configuration file")]
    pub config: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true, help = "Set the logging level")]
    pub log_level: Option<String>,

    /// Network namespace name or path
    #[arg(
        short,
        long,
        global = true,
        help = "Network namespace to operate in (name under /var/run/netns or a path)"
    )]
    pub netns: Option<String>,

    /// Destinations kept in the source table by `move`/`isolate`
    #[arg(long, global = true, help = "Comma separated CIDRs never moved between tables")]
    pub pinned_destinations: Option<String>,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration and exit without touching routes")]
    pub validate_config: bool,

    /// Print default configuration and exit
    #[arg(long, help = "Print default configuration in TOML format and exit")]
    pub print_default_config: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List routes, optionally only those leaving through one interface
    Routes {
        #[arg(short, long)]
        interface: Option<String>,
        #[arg(short, long, default_value = "all")]
        family: IpFamily,
    },
    /// Print the default gateways reachable through an interface
    Gateways {
        #[arg(short, long)]
        interface: String,
        #[arg(short, long, default_value = "all")]
        family: IpFamily,
    },
    /// Print the interface carrying the namespace's default route
    DefaultInterface {
        #[arg(short, long, default_value = "inet")]
        family: IpFamily,
        #[arg(short, long, help = "Interface to skip")]
        exclude: Option<String>,
    },
    /// List policy rules
    Rules {
        #[arg(short, long, default_value = "all")]
        family: IpFamily,
    },
    /// Add or delete a policy rule
    #[command(subcommand)]
    Rule(RuleCommand),
    /// Install routes into a table
    #[command(subcommand)]
    Route(RouteCommand),
    /// Move an interface's routes from one table to another
    Move {
        #[arg(short, long)]
        interface: String,
        #[arg(long, help = "Source table (defaults to the main table)")]
        from_table: Option<u32>,
        #[arg(long)]
        to_table: u32,
        #[arg(short, long, default_value = "all")]
        family: IpFamily,
    },
    /// Steer traffic sourced from an interface into its own table
    Isolate {
        #[arg(short, long)]
        interface: String,
        #[arg(short, long)]
        table: u32,
        #[arg(
            short,
            long = "source",
            value_parser = parse_network,
            help = "Source network (repeatable)"
        )]
        sources: Vec<IpNetwork>,
        #[arg(short, long, default_value = "all")]
        family: IpFamily,
    },
}

#[derive(Subcommand, Debug)]
pub enum RuleCommand {
    Add(RuleArgs),
    #[command(alias = "delete")]
    Del(RuleArgs),
}

#[derive(Args, Debug, Clone)]
#[command(group(
    clap::ArgGroup::new("selector").required(true).args(["to", "from", "mark"])
))]
pub struct RuleArgs {
    #[arg(long, value_parser = parse_network)]
    pub to: Option<IpNetwork>,
    #[arg(long, value_parser = parse_network)]
    pub from: Option<IpNetwork>,
    #[arg(long, value_parser = parse_mark, help = "Firewall mark, decimal or 0x-prefixed hex")]
    pub mark: Option<u32>,
    #[arg(short, long)]
    pub table: u32,
    /// Only used by mark rules; address rules take the network's family
    #[arg(short, long, default_value = "all")]
    pub family: IpFamily,
    /// Mark rule priority, overriding the configured one
    #[arg(short, long)]
    pub priority: Option<u32>,
}

#[derive(Subcommand, Debug)]
pub enum RouteCommand {
    Add(RouteArgs),
}

#[derive(Args, Debug, Clone)]
pub struct RouteArgs {
    #[arg(short, long)]
    pub table: u32,
    #[arg(short, long)]
    pub interface: String,
    /// Destination; the default route when omitted
    #[arg(long, value_parser = parse_network)]
    pub to: Option<IpNetwork>,
    #[arg(long)]
    pub via4: Option<Ipv4Addr>,
    #[arg(long)]
    pub via6: Option<Ipv6Addr>,
    #[arg(short, long, default_value = "all")]
    pub family: IpFamily,
    #[arg(short, long, default_value = "global")]
    pub scope: Scope,
}

fn parse_mark(s: &str) -> Result<u32, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse::<u32>(),
    };
    parsed.map_err(|e| format!("invalid mark '{}': {}", s, e))
}

impl CliArgs {
    /// Apply CLI arguments over base configuration
    pub fn apply_to_config(&self, mut base_config: AppConfig) -> Result<AppConfig, ConfigError> {
        if let Some(ref netns) = self.netns {
            base_config.netns = Some(netns.clone());
        }

        if let Some(ref level) = self.log_level {
            base_config.log_level = level.clone();
        }

        if let Some(ref pinned) = self.pinned_destinations {
            base_config.pinned_destinations = parse_list(pinned);
        }

        Ok(base_config)
    }
}

/// Print default configuration in TOML format
pub fn print_default_config() {
    let default_config = AppConfig::default();

    println!("# Netns Policy Routing Configuration");
    println!("# This is the default configuration with all available options");
    println!();
    println!("# Network namespace to operate in; omit for the current one");
    println!("# netns = \"/var/run/netns/example\"");
    println!();
    println!("[logging]");
    println!("# Log level: trace, debug, info, warn, error");
    println!("level = \"{}\"", default_config.log_level);
    println!();
    println!("[routing]");
    println!("# Table routes are moved out of by default");
    println!("main_table = {}", default_config.main_table);
    println!();
    println!("# Priority of fwmark rules");
    println!("mark_rule_priority = {}", default_config.mark_rule_priority);
    println!();
    println!("# Destinations that always stay in the source table");
    let pinned: Vec<String> = default_config
        .pinned_destinations
        .iter()
        .map(|d| format!("\"{}\"", d))
        .collect();
    println!("pinned_destinations = [{}]", pinned.join(", "));
}
