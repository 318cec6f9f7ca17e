//! Rtnetlink link helpers - bridge interface lookup and bring-up

use std::num::NonZeroI32;

use async_trait::async_trait;
use futures::TryStreamExt;
use rtnetlink::{new_connection, Handle};

use crate::backend::LinkManager;
use crate::error::OvsError;

/// `LinkManager` backed by the kernel's rtnetlink interface
#[derive(Debug, Clone, Copy, Default)]
pub struct NetlinkLinks;

impl NetlinkLinks {
    pub fn new() -> Self {
        Self
    }
}

fn connect() -> Result<Handle, OvsError> {
    let (connection, handle, _) = new_connection().map_err(OvsError::NetlinkConnection)?;
    tokio::spawn(connection);
    Ok(handle)
}

/// The kernel answers a by-name lookup of a missing link with ENODEV
fn is_missing_link(code: Option<NonZeroI32>) -> bool {
    code.map(NonZeroI32::get) == Some(-libc::ENODEV)
}

/// Interface index by name; None when the kernel does not know the name
async fn link_index(handle: &Handle, name: &str) -> Result<Option<u32>, OvsError> {
    let mut links = handle.link().get().match_name(name.to_string()).execute();
    match links.try_next().await {
        Ok(link) => Ok(link.map(|l| l.header.index)),
        Err(rtnetlink::Error::NetlinkError(msg)) if is_missing_link(msg.code) => {
            log::debug!("Link {} not found", name);
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl LinkManager for NetlinkLinks {
    async fn link_exists(&self, name: &str) -> Result<bool, OvsError> {
        let handle = connect()?;
        Ok(link_index(&handle, name).await?.is_some())
    }

    async fn set_link_up(&self, name: &str) -> Result<(), OvsError> {
        let handle = connect()?;
        let ifindex = link_index(&handle, name)
            .await?
            .ok_or_else(|| OvsError::LinkNotFound(name.to_string()))?;

        handle.link().set(ifindex).up().execute().await?;
        log::debug!("Link {} (index {}) set up", name, ifindex);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Uses the loopback interface which always exists.
    #[tokio::test(flavor = "current_thread")]
    async fn test_loopback_exists() {
        let links = NetlinkLinks::new();
        match links.link_exists("lo").await {
            Ok(found) => assert!(found),
            // sandboxes without netlink access
            Err(e) => println!("netlink unavailable: {e}"),
        }
    }

    #[test]
    fn test_only_enodev_means_missing() {
        assert!(is_missing_link(NonZeroI32::new(-libc::ENODEV)));
        assert!(!is_missing_link(NonZeroI32::new(-libc::EPERM)));
        assert!(!is_missing_link(NonZeroI32::new(-libc::EINVAL)));
        // ack
        assert!(!is_missing_link(None));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_missing_link() {
        let links = NetlinkLinks::new();
        if let Ok(found) = links.link_exists("nosuchlink0").await {
            assert!(!found);
        }
    }
}
