//! Network configuration generation for CANopen masters
//!
//! Given a YAML network description and the EDS/DCF files of the slaves, this
//! crate composes the per-slave concise-SDO boot scripts and the master-level
//! script ([generate_network]), and prepares the template context for the
//! static C device descriptor emitted by `dcf2dev` ([cdevice]).

use indexmap::IndexMap;

use candcf_core::diag::Diagnostics;

pub mod cdevice;
pub mod config;
pub mod master;
pub mod slave;

pub use cdevice::{CDevice, EmitError};
pub use config::{ConfigError, NetworkConfig, Options};
pub use master::Master;
pub use slave::{ConfigureError, Slave};

/// Build every slave and the master from a parsed network config
///
/// Slaves whose node-ID is still unconfigured (255) are skipped with a
/// warning. With `strict` set, a slave DCF that fails lint aborts the run.
pub fn generate_network(
    config: &NetworkConfig,
    diag: &mut Diagnostics,
    strict: bool,
) -> Result<(Master, IndexMap<String, Slave>), ConfigureError> {
    let mut options = config.options.clone();
    let mut slaves = IndexMap::new();
    for (name, slave_config) in &config.slaves {
        let slave = Slave::from_config(name, slave_config, &mut options, diag, strict)?;
        if slave.device.node_id == 255 {
            diag.warn(
                2,
                format!("{}: ignoring slave with unconfigured node-ID", name),
            );
            continue;
        }
        slaves.insert(name.clone(), slave);
    }
    let master = Master::from_config(&config.master, &options, &mut slaves, diag)?;
    Ok((master, slaves))
}
