//! Environment fallbacks for settings the config files may leave out

use std::net::Ipv4Addr;
use std::str::FromStr;

const HUB_PORT: &str = "HUB_PORT";
const HUB_ADDR: &str = "HUB_ADDR";
const HUB_SECRET: &str = "HUB_SECRET";
const AGENT_SECRET: &str = "AGENT_SECRET";
const AGENT_ID: &str = "AGENT_ID";

const DEFAULT_PORT: u16 = 51243;
const DEFAULT_ADDR: Ipv4Addr = Ipv4Addr::new(0, 0, 0, 0);

/// Non-empty value of an environment variable
fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.trim().is_empty())
}

/// Parsed environment variable, `default` when unset or unparsable
fn parsed_var<T: FromStr>(name: &str, default: T) -> T {
    non_empty_var(name)
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}

pub fn get_port() -> u16 {
    parsed_var(HUB_PORT, DEFAULT_PORT)
}

pub fn get_addr() -> Ipv4Addr {
    parsed_var(HUB_ADDR, DEFAULT_ADDR)
}

/// Token the hub API requires, if any
pub fn get_hub_secret() -> Option<String> {
    non_empty_var(HUB_SECRET)
}

/// Token the agent presents to the hub, if any
pub fn get_agent_secret() -> Option<String> {
    non_empty_var(AGENT_SECRET)
}

pub fn get_agent_id() -> Option<String> {
    non_empty_var(AGENT_ID)
}
