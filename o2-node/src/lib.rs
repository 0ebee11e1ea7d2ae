//! A minimal host process: wires an [`o2_core::Process`] to the
//! `o2-net-poll` reactor, giving it a TCP listen address and, in a background
//! thread, logging whatever [`o2_core::Event`]s it surfaces.
#![warn(missing_docs)]

use std::net;
use std::thread;

use o2_common::EnsembleName;
use o2_core::{Config, Process};

/// Errors raised while starting or running the node.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The ensemble name failed validation (spec §3, §6).
    #[error(transparent)]
    Common(#[from] o2_common::Error),
    /// The reactor hit an unrecoverable socket error.
    #[error(transparent)]
    Reactor(#[from] o2_net_poll::Error),
}

/// Build and run a process advertising `listen` within `ensemble_name`,
/// optionally falling back on `hub` when broadcast discovery is unavailable
/// (spec §4.7 "Hubs"). Blocks until the reactor hits an unrecoverable error.
pub fn run(ensemble_name: &str, listen: net::SocketAddr, hub: Option<net::SocketAddr>) -> Result<(), Error> {
    log::info!("starting o2 process \"{}\" listening on {}", ensemble_name, listen);

    let mut config = Config::new(EnsembleName::new(ensemble_name)?);
    config.hub_address = hub;

    let process = Process::new(config, listen);
    let (events_tx, events_rx) = crossbeam_channel::unbounded();

    thread::spawn(move || {
        for event in events_rx {
            log::info!("{:?}", event);
        }
    });

    let mut reactor = o2_net_poll::Reactor::new();
    reactor.run(process, events_tx, &[listen]).map_err(Error::from)
}
