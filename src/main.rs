mod args;

use args::{normalize_zone, Cli, Command};
use clap::Parser;
use futures::future::join_all;
use log::LevelFilter;
use log4rs::append::console::{ConsoleAppender, Target};
use log4rs::config::{Appender, Config, Root};
use std::error::Error;
use std::sync::Arc;
use vpc_chain::cloud::CloudNetwork;
use vpc_chain::config::{self, Settings};
use vpc_chain::models::{Ipv4, PRIVATE, PUBLIC};
use vpc_chain::{cloud_network, output, Vpc, VpcOptions};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // Do as little as possible in main.rs as it can't contain any tests
    dotenv::dotenv().ok();
    init_logging();
    let cli = Cli::parse();
    log::info!("#Start main() {:?}", cli.command);

    let mut settings = Settings::from_env();
    if let Some(region) = &cli.region {
        settings = settings.with_region(region);
    }
    if cli.profile.is_some() {
        settings.profile = cli.profile.clone();
    }
    let client = cloud_network(&settings, cli.dry_run);
    let options = VpcOptions::from(&settings);
    let zones = |zones: &[String]| -> Vec<String> {
        zones
            .iter()
            .map(|z| normalize_zone(&settings.region, z))
            .collect()
    };

    match &cli.command {
        Command::Create {
            name,
            cidr,
            zones: z,
            prefix,
        } => {
            let vpc = Vpc::create(
                client,
                name,
                Ipv4::new(cidr)?,
                options.with_subnet_prefix(*prefix),
            )?;
            vpc.create_vpc_chain(&zones(z))?;
            output::print_subnets_csv(&vpc);
        }
        Command::Subnets { vpc_id, zones: z } => {
            let vpc = Arc::new(open_vpc(client, vpc_id, options, cli.dry_run)?);
            pair_zones_concurrently(vpc, zones(z)).await?;
        }
        Command::Delete {
            vpc_id,
            total_clean,
        } => {
            let vpc = open_vpc(client, vpc_id, options, cli.dry_run)?;
            vpc.delete_vpc_chain(*total_clean)?;
            log::info!("Deleted chain of {}", vpc.id());
        }
        Command::List { vpc_id, json } => {
            let vpc = open_vpc(client, vpc_id, options, cli.dry_run)?;
            vpc.list_subnets()?;
            if *json {
                output::print_subnets_json(&vpc)?;
            } else {
                output::print_subnets_csv(&vpc);
            }
        }
        Command::Bastion {
            vpc_id,
            zone,
            allowed_cidr,
        } => {
            let vpc = open_vpc(client, vpc_id, options, cli.dry_run)?;
            let bastion =
                vpc.prepare_bastion_proxy(&normalize_zone(&settings.region, zone), allowed_cidr)?;
            println!(
                "{} {}",
                bastion.id,
                bastion.public_ip.as_deref().unwrap_or("-")
            );
        }
    }

    log::info!("#End main()");
    Ok(())
}

/// log4rs.yml when present, plain stderr at info level otherwise.
fn init_logging() {
    let Err(file_error) = log4rs::init_file("log4rs.yml", Default::default()) else {
        return;
    };
    let stderr = ConsoleAppender::builder().target(Target::Stderr).build();
    let fallback = Config::builder()
        .appender(Appender::builder().build("stderr", Box::new(stderr)))
        .build(Root::builder().appender("stderr").build(LevelFilter::Info));
    match fallback.map(log4rs::init_config) {
        Ok(Ok(_handle)) => log::warn!("log4rs.yml not loaded ({file_error}), logging to stderr"),
        _ => eprintln!("logging disabled: {file_error}"),
    }
}

/// Import `vpc_id`, or stand up a fresh in-memory VPC with a gateway for dry runs.
fn open_vpc(
    client: Arc<dyn CloudNetwork>,
    vpc_id: &str,
    options: VpcOptions,
    dry_run: bool,
) -> vpc_chain::Result<Vpc> {
    if !dry_run {
        return Vpc::import(client, vpc_id, options);
    }
    log::warn!("Dry run: simulating {vpc_id} with a new in-memory vpc");
    let vpc = Vpc::create(
        client,
        config::VPC_DEFAULT_NAME,
        Ipv4::new(config::DEFAULT_VPC_CIDR)?,
        options,
    )?;
    vpc.create_vpc_chain::<&str>(&[])?;
    Ok(vpc)
}

/// Pair every zone on its own blocking task; the first failure is returned
/// after all zones finished.
async fn pair_zones_concurrently(vpc: Arc<Vpc>, zones: Vec<String>) -> Result<(), Box<dyn Error>> {
    let tasks = zones.into_iter().map(|zone| {
        let vpc = Arc::clone(&vpc);
        tokio::task::spawn_blocking(move || {
            let pair = vpc.prepare_pair_subnet_by_zone(&zone);
            (zone, pair)
        })
    });

    let mut first_error = None;
    for joined in join_all(tasks).await {
        let (zone, pair) = joined?;
        match pair {
            Ok(pair) => {
                for label in [PUBLIC, PRIVATE] {
                    if let Some(subnet) = pair.get(label) {
                        log::info!("{}", output::zone_line(subnet));
                    }
                }
            }
            Err(e) => {
                log::error!("ZONE {zone} failed: {e}");
                first_error.get_or_insert(e);
            }
        }
    }
    match first_error {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}
