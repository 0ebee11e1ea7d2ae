use std::net;
use std::process::ExitCode;

use argh::FromArgs;

/// run a standalone o2 process
#[derive(FromArgs)]
struct Args {
    /// ensemble name peers must share to be recognized (spec §3)
    #[argh(option, default = "String::from(\"o2\")")]
    ensemble: String,

    /// address to listen on for peer stream connections
    #[argh(option, default = "\"0.0.0.0:0\".parse().unwrap()")]
    listen: net::SocketAddr,

    /// hub address to fall back on when broadcast discovery is unavailable (spec §4.7)
    #[argh(option)]
    hub: Option<net::SocketAddr>,
}

fn main() -> ExitCode {
    env_logger::init();
    let args: Args = argh::from_env();

    match o2_node::run(&args.ensemble, args.listen, args.hub) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{}", err);
            ExitCode::FAILURE
        }
    }
}
