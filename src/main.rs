use clap::Parser;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use netns_policy_routing::config::cli::{
    print_default_config, CliArgs, Command, RouteCommand, RuleArgs, RuleCommand,
};
use netns_policy_routing::config::{load_configuration, AppConfig};
use netns_policy_routing::error::{AppError, RouteError};
use netns_policy_routing::network::{NetNsExecutor, NetworkNamespace};
use netns_policy_routing::routing::{
    DefaultInterfaceLocator, PolicyRouter, RouteNetlink, RtNetlink, RtNetlinkConnector,
};

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let cli = CliArgs::parse();

    if cli.print_default_config {
        print_default_config();
        return Ok(());
    }

    let config = load_configuration(&cli)?;

    // Initialize logging; RUST_LOG takes over when set
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if cli.validate_config {
        info!("Configuration is valid");
        println!("{:#?}", config);
        return Ok(());
    }

    let Some(command) = cli.command else {
        info!("No command given, see --help");
        return Ok(());
    };

    let namespace = config
        .netns
        .as_deref()
        .map(NetworkNamespace::new)
        .unwrap_or_else(NetworkNamespace::current);
    debug!(%namespace, "operating in network namespace");

    let kernel = match config.netns {
        Some(_) => RtNetlink::connect_in(&NetNsExecutor::new(), &namespace)?,
        None => RtNetlink::connect()?,
    };
    let mark_rule_priority = match &command {
        Command::Rule(RuleCommand::Add(args) | RuleCommand::Del(args)) => args.priority,
        _ => None,
    }
    .unwrap_or(config.mark_rule_priority);
    let policy = config.migration_policy()?;
    debug!(pinned = ?policy.pinned(), mark_rule_priority, "routing policy");
    let router = PolicyRouter::new(kernel)
        .with_mark_rule_priority(mark_rule_priority)
        .with_migration_policy(policy);

    run(&router, &config, &namespace, command).await?;
    Ok(())
}

async fn run<K: RouteNetlink>(
    router: &PolicyRouter<K>,
    config: &AppConfig,
    namespace: &NetworkNamespace,
    command: Command,
) -> Result<(), RouteError> {
    match command {
        Command::Routes { interface, family } => {
            for route in router.list_routes(interface.as_deref(), family).await? {
                println!("{}", route);
            }
        }
        Command::Gateways { interface, family } => {
            for gateway in router.default_gateways(&interface, family).await? {
                println!("{}", gateway);
            }
        }
        Command::Rules { family } => {
            for rule in router.list_rules(family).await? {
                println!("{}", rule);
            }
        }
        Command::Rule(RuleCommand::Add(args)) => add_rule(router, args).await?,
        Command::Rule(RuleCommand::Del(args)) => delete_rule(router, args).await?,
        Command::Route(RouteCommand::Add(args)) => {
            router
                .add_route(
                    args.table,
                    args.family,
                    args.scope,
                    &args.interface,
                    args.to,
                    args.via4,
                    args.via6,
                )
                .await?;
            info!(interface = %args.interface, table = args.table, "route installed");
        }
        Command::Move {
            interface,
            from_table,
            to_table,
            family,
        } => {
            let from_table = from_table.unwrap_or(config.main_table);
            router
                .move_routes(&interface, from_table, to_table, family)
                .await?;
            info!(%interface, from_table, to_table, "routes moved");
        }
        Command::Isolate {
            interface,
            table,
            sources,
            family,
        } => {
            for source in sources {
                router.add_source_rule(source, table).await?;
            }
            router
                .move_routes(&interface, config.main_table, table, family)
                .await?;
            info!(%interface, table, "interface isolated");
        }
        Command::DefaultInterface { family, exclude } => {
            let locator = DefaultInterfaceLocator::new(NetNsExecutor::new(), RtNetlinkConnector);
            let name = locator
                .find_default_interface(family, exclude.as_deref(), namespace)
                .await?;
            println!("{}", name);
        }
    }
    Ok(())
}

async fn add_rule<K: RouteNetlink>(
    router: &PolicyRouter<K>,
    args: RuleArgs,
) -> Result<(), RouteError> {
    match (args.to, args.from, args.mark) {
        (Some(dst), _, _) => router.add_destination_rule(dst, args.table).await,
        (_, Some(src), _) => router.add_source_rule(src, args.table).await,
        (_, _, Some(mark)) => router.add_mark_rule(mark, args.table, args.family).await,
        _ => Err(RouteError::InvalidRoute("rule needs --to, --from or --mark".to_string())),
    }
}

async fn delete_rule<K: RouteNetlink>(
    router: &PolicyRouter<K>,
    args: RuleArgs,
) -> Result<(), RouteError> {
    match (args.to, args.from, args.mark) {
        (Some(dst), _, _) => router.delete_destination_rule(dst, args.table).await,
        (_, Some(src), _) => router.delete_source_rule(src, args.table).await,
        (_, _, Some(mark)) => router.delete_mark_rule(mark, args.table, args.family).await,
        _ => Err(RouteError::InvalidRoute("rule needs --to, --from or --mark".to_string())),
    }
}
