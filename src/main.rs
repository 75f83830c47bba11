//! Declares the stack described by `stack.yaml` (or the file named by `STACK_CONFIG`) against an
//! in-memory provisioner and prints the resulting plan as a yaml stream. Values that are only
//! known once the infrastructure exists are shown as `<pending>`.
use anyhow::{bail, Context};
use cloud_app::app::SidecarOptions;
use cloud_app::config::StackConfig;
use cloud_app::provisioner::{InMemoryProvisioner, Scope};
use cloud_app::stack::Stack;

use std::sync::Arc;

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let (config, path) = StackConfig::load().context("failed to load stack config")?;
    log::info!("Loaded stack config from '{}'", path.display());

    let options = SidecarOptions::load(config.sidecar_template.as_deref(), &config.ca_bundle)
        .context("failed to load sidecar options")?;

    let provisioner = Arc::new(InMemoryProvisioner::new());
    let scope = Scope::new(provisioner.clone());
    let stack = Stack::declare(&scope, &config, &options).context("failed to declare stack")?;

    if let Some(failure) = provisioner.first_failure() {
        bail!("declaration pass aborted: {}", failure);
    }

    let plan = provisioner.render_yaml().context("failed to render plan")?;
    print!("{}", plan);

    log::info!("Declared {} resources", provisioner.len());
    for (name, value) in stack.outputs() {
        eprintln!("{}: {}", name, value);
    }
    Ok(())
}
