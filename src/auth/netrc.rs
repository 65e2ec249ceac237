//! netrc credential lookup.
//!
//! The file is taken from `NETRC` when set, otherwise `~/.netrc` and then
//! `~/_netrc` are tried. Parse failures are logged and treated as "no
//! credentials".

use crate::env::Environment;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetrcEntry {
    pub login: String,
    pub account: Option<String>,
    pub password: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Netrc {
    machines: HashMap<String, NetrcEntry>,
    default: Option<NetrcEntry>,
}

impl Netrc {
    pub fn parse(content: &str) -> Result<Self, String> {
        let mut netrc = Netrc::default();
        let mut tokens = content.split_whitespace();
        // None: the default entry, Some(host): a machine entry
        let mut current: Option<(Option<String>, NetrcEntry)> = None;

        fn flush(netrc: &mut Netrc, current: Option<(Option<String>, NetrcEntry)>) {
            match current {
                Some((Some(host), entry)) => {
                    netrc.machines.entry(host).or_insert(entry);
                }
                Some((None, entry)) => netrc.default = Some(entry),
                None => {}
            }
        }

        while let Some(token) = tokens.next() {
            match token {
                "machine" => {
                    flush(&mut netrc, current.take());
                    let host = tokens.next().ok_or("missing machine name")?;
                    current = Some((Some(host.to_string()), NetrcEntry::default()));
                }
                "default" => {
                    flush(&mut netrc, current.take());
                    current = Some((None, NetrcEntry::default()));
                }
                "login" | "user" | "account" | "password" => {
                    let value = tokens.next().ok_or_else(|| format!("missing value for {token}"))?;
                    let (_, entry) = current
                        .as_mut()
                        .ok_or_else(|| format!("{token} outside of a machine entry"))?;
                    match token {
                        "account" => entry.account = Some(value.to_string()),
                        "password" => entry.password = value.to_string(),
                        _ => entry.login = value.to_string(),
                    }
                }
                "macdef" => {
                    // macro bodies end at an empty line; without line info, skip the name only
                    flush(&mut netrc, current.take());
                    tokens.next();
                }
                other => return Err(format!("unexpected token {other:?}")),
            }
        }
        flush(&mut netrc, current);
        Ok(netrc)
    }

    pub fn authenticators(&self, host: &str) -> Option<&NetrcEntry> {
        self.machines.get(host).or(self.default.as_ref())
    }
}

fn netrc_locations(env: &dyn Environment) -> Vec<PathBuf> {
    if let Some(path) = env.var("NETRC") {
        return vec![PathBuf::from(path)];
    }
    let Some(home) = env.var("HOME").or_else(|| env.var("USERPROFILE")) else {
        return Vec::new();
    };
    let home = Path::new(&home);
    vec![home.join(".netrc"), home.join("_netrc")]
}

/// Returns `(login, password)` for the host of `url`, if a netrc file has them.
pub fn get_netrc_auth(env: &dyn Environment, url: &str) -> Option<(String, String)> {
    let host = url::Url::parse(url).ok()?.host_str()?.to_string();
    let path = netrc_locations(env).into_iter().find(|p| p.exists())?;

    let content = match std::fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) => {
            log::warn!("unable to read netrc file {}: {e}", path.display());
            return None;
        }
    };

    match Netrc::parse(&content) {
        Ok(netrc) => netrc
            .authenticators(&host)
            .map(|entry| (entry.login.clone(), entry.password.clone())),
        Err(e) => {
            log::warn!("unable to parse netrc file {}: {e}", path.display());
            None
        }
    }
}
