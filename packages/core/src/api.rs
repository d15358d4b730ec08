//! Entry point tying the store, the driver catalog and provisioning together
//!
//! Commands go through a [`Client`]: it builds new hosts, loads existing ones
//! with live drivers, and runs the create and provision flows.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use regex::Regex;

use crate::auth::AuthOptions;
use crate::cert;
use crate::drivers::image::{BootImageStore, LocalImageCache};
use crate::drivers::{WaitPolicy, none, wait_for_state};
use crate::host::{Filestore, Host, HostError, HostLock, HostOptions, HostStore};
use crate::list::HostDecoder;
use crate::plugin::DriverCatalog;
use crate::ssh::{ExternalConnector, SshConnector};
use crate::state::State;

static VALID_HOST_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9\-\.]*$").expect("host name pattern is valid")
});

/// True when `name` can be used for a new host
pub fn validate_host_name(name: &str) -> bool {
    VALID_HOST_NAME.is_match(name)
}

pub struct Client {
    store: Filestore,
    catalog: DriverCatalog,
    connector: Arc<dyn SshConnector>,
    images: Arc<dyn BootImageStore>,
    wait: WaitPolicy,
    ssh_attempts: Option<u32>,
}

impl Client {
    pub fn new(store_path: impl Into<PathBuf>, catalog: DriverCatalog) -> Self {
        let store = Filestore::new(store_path);
        let images = Arc::new(LocalImageCache::new(store.path()));
        Self {
            store,
            catalog,
            connector: Arc::new(ExternalConnector::default()),
            images,
            wait: WaitPolicy::default(),
            ssh_attempts: None,
        }
    }

    pub fn with_connector(mut self, connector: Arc<dyn SshConnector>) -> Self {
        self.connector = connector;
        self
    }

    pub fn with_images(mut self, images: Arc<dyn BootImageStore>) -> Self {
        self.images = images;
        self
    }

    pub fn with_wait(mut self, wait: WaitPolicy) -> Self {
        self.wait = wait;
        self
    }

    /// Bound the SSH wait that precedes provisioning; `None` waits forever
    pub fn with_ssh_attempts(mut self, attempts: Option<u32>) -> Self {
        self.ssh_attempts = attempts;
        self
    }

    pub fn store(&self) -> &Filestore {
        &self.store
    }

    pub fn store_path(&self) -> &Path {
        self.store.path()
    }

    pub fn catalog(&self) -> &DriverCatalog {
        &self.catalog
    }

    /// A host not yet created, with default auth and engine options
    pub fn new_host(&self, driver_name: &str, name: &str) -> Result<Host, HostError> {
        if !validate_host_name(name) {
            return Err(HostError::InvalidName(name.to_string()));
        }
        if self.store.exists(name)? {
            return Err(HostError::AlreadyExists(name.to_string()));
        }

        let driver = self.catalog.new_driver(driver_name, name, self.store.path())?;
        let options = HostOptions {
            auth: AuthOptions::for_host(&self.store.certs_dir(), &self.store.machine_dir(name)),
            ..HostOptions::default()
        };
        Ok(Host::new(name, driver, options).with_wait(self.wait))
    }

    /// Bring a configured host to life: certificates, backend, provisioning
    ///
    /// The record is saved before and after the backend is created so a
    /// failed create still leaves something `rm` can clean up.
    pub fn create(&self, host: &mut Host) -> Result<(), HostError> {
        let _lock = self.store.lock(&host.name)?;

        cert::bootstrap_certificates(&host.host_options.auth, false)?;

        tracing::info!("Running pre-create checks...");
        host.driver()?.pre_create_check()?;
        self.store.save(host)?;

        tracing::info!("Creating machine...");
        host.driver_mut()?.create()?;
        self.store.save(host)?;

        tracing::info!("Waiting for machine to be running, this may take a few minutes...");
        wait_for_state(host.driver()?, State::Running, self.wait)?;

        if host.driver_name == none::DRIVER_NAME {
            return Ok(());
        }

        self.provision(host)?;
        tracing::info!("Podman is up and running!");
        Ok(())
    }

    /// Load a host and decode its driver
    pub fn load(&self, name: &str) -> Result<Host, HostError> {
        let mut host = self.store.load(name)?;
        host.decode(&self.catalog, self.store.path())?;
        host.set_wait(self.wait);
        Ok(host)
    }

    /// Every host; records or drivers that fail to load are reported by name
    pub fn load_all(&self) -> Result<(Vec<Host>, BTreeMap<String, HostError>), HostError> {
        let (stored, mut errors) = self.store.list()?;
        let mut hosts = Vec::with_capacity(stored.len());
        for mut host in stored {
            match host.decode(&self.catalog, self.store.path()) {
                Ok(()) => {
                    host.set_wait(self.wait);
                    hosts.push(host);
                }
                Err(e) => {
                    errors.insert(host.name.clone(), e);
                }
            }
        }
        Ok((hosts, errors))
    }

    /// Every host with its driver still undecoded
    ///
    /// For listings, which decode each driver under their own timeout.
    pub fn load_all_stored(&self) -> Result<(Vec<Host>, BTreeMap<String, HostError>), HostError> {
        let (mut hosts, errors) = self.store.list()?;
        for host in &mut hosts {
            host.set_wait(self.wait);
        }
        Ok((hosts, errors))
    }

    /// What a listing needs to decode drivers the way [`Client::load`] does
    pub fn decoder(&self) -> HostDecoder {
        HostDecoder::new(self.catalog.clone(), self.store.path())
    }

    pub fn save(&self, host: &Host) -> Result<(), HostError> {
        self.store.save(host)
    }

    pub fn lock(&self, name: &str) -> Result<HostLock, HostError> {
        self.store.lock(name)
    }

    /// Tear down the backend and delete the record
    ///
    /// With `force` the record goes even when the backend refuses.
    pub fn remove(&self, name: &str, force: bool) -> Result<(), HostError> {
        let lock = self.store.lock(name)?;
        match self.load(name).and_then(|mut host| host.remove()) {
            Ok(()) => {}
            Err(e) if force => tracing::warn!("Ignoring error removing {}: {}", name, e),
            Err(e) => return Err(e),
        }
        drop(lock);
        self.store.remove(name)?;
        tracing::info!("Successfully removed {}", name);
        Ok(())
    }

    /// Run the provisioner for the guest OS and save the updated auth paths
    pub fn provision(&self, host: &mut Host) -> Result<(), HostError> {
        let commander = self.connector.connect(host.driver()?)?;
        host.set_ssh_attempts(self.ssh_attempts);
        host.provision(commander, self.images.clone())?;
        self.store.save(host)
    }

    pub fn upgrade(&self, host: &mut Host) -> Result<(), HostError> {
        let _lock = self.store.lock(&host.name)?;
        let commander = self.connector.connect(host.driver()?)?;
        host.upgrade(commander, self.images.clone())?;
        self.store.save(host)
    }

    pub fn regenerate_certs(&self, host: &mut Host, regenerate_ca: bool) -> Result<(), HostError> {
        let _lock = self.store.lock(&host.name)?;
        let commander = self.connector.connect(host.driver()?)?;
        host.regenerate_certs(commander, self.images.clone(), regenerate_ca)?;
        self.store.save(host)
    }
}
