use bridgewall::cni::config::{PortmapConf, SUPPORTED_CNI_VERSIONS, parse_portmap_conf};
use bridgewall::cni::error::CniError;
use bridgewall::cni::{self, Command, Invocation};
use bridgewall::{PortmapPlugin, Result, VERSION, init_logging};
use clap::Parser;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about = "CNI plugin that manages nftables port-mapping rules for container interfaces", long_about = None)]
struct Args {
    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    /// Print version and build information and exit
    #[arg(long = "version-info")]
    version_info: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let args = Args::parse();

    if args.version_info {
        println!("bridgewall-portmap {}", VERSION);
        println!("supported CNI versions: {}", SUPPORTED_CNI_VERSIONS.join(", "));
        return;
    }

    let _guard = init_logging(args.debug);

    let invocation = match Invocation::from_env() {
        Ok(invocation) => invocation,
        Err(e) => std::process::exit(cni::report_error(&e, "")),
    };

    if invocation.command == Command::Version {
        cni::print_version_document();
        return;
    }

    let conf = match parse_portmap_conf(&invocation.stdin) {
        Ok(conf) => conf,
        Err(e) => std::process::exit(cni::report_error(&e.into(), "")),
    };

    if let Err(e) = run(&invocation, &conf).await {
        std::process::exit(cni::report_error(&e, &conf.cni_version));
    }
}

async fn run(invocation: &Invocation, conf: &PortmapConf) -> Result<()> {
    info!(
        command = ?invocation.command,
        container_id = %invocation.container_id,
        ifname = %invocation.ifname,
        mappings = conf.runtime_config.port_mappings.len(),
        "bridgewall-portmap v{} invoked",
        VERSION
    );

    #[cfg(target_os = "linux")]
    bridgewall::security::check_capabilities()?;

    let plugin = PortmapPlugin::new(conf, &invocation.container_id);
    match invocation.command {
        Command::Add => {
            let prev = conf
                .prev_result
                .as_ref()
                .ok_or(CniError::MissingPrevResult)?;
            plugin.add(prev).await?;
            cni::print_result(prev, &conf.cni_version)?;
        }
        Command::Check => {
            let prev = conf
                .prev_result
                .as_ref()
                .ok_or(CniError::MissingPrevResult)?;
            plugin.check(prev).await?;
        }
        Command::Del => {
            // DEL may arrive without a previous result; an empty one makes
            // delete a no-op.
            let prev = conf.prev_result.clone().unwrap_or_default();
            plugin.delete(&prev).await?;
        }
        Command::Version => {}
    }
    Ok(())
}
