use config::Config;
use util::context::RuntimeContext;

use crate::error::Result;

pub fn load_config(context: &RuntimeContext, vmid: u32) -> Result<Config> {
    let text = std::fs::read_to_string(context.config_path(vmid))?;
    Ok(config::codec::parse_config_file(&text)?)
}

pub fn persist_config(context: &RuntimeContext, vmid: u32, config: &Config) -> Result<()> {
    std::fs::write(context.config_path(vmid), config::codec::print_config_file(config))?;
    Ok(())
}
