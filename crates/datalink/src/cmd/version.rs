use crate::cmd::VersionArgs;
use crate::exit::{CliResult, Exit};

pub fn run(args: VersionArgs) -> CliResult<Exit> {
    if !args.extended {
        println!("datalink {}", env!("CARGO_PKG_VERSION"));
        return Ok(Exit::Success);
    }

    println!("name: datalink");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!(
        "target: {}",
        option_env!("DATALINK_BUILD_TARGET").unwrap_or("unknown")
    );
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);
    println!(
        "protocol_ports: peer={}, listen={}",
        datalink_transport::PEER_PORT,
        datalink_transport::LISTEN_PORT
    );
    println!(
        "features: session={}, async={}, cli=true",
        cfg!(feature = "session"),
        cfg!(feature = "async")
    );

    Ok(Exit::Success)
}
