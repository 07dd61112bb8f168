use crate::error::{AppError, AppResult, ConfigError};

/// The ordered driver list and this driver's position in it.
#[derive(Debug, Clone)]
pub struct ClusterTopology {
    drivers: Vec<String>,
    self_id: usize,
}

impl ClusterTopology {
    /// Resolve this driver's id from `--driver-id` or from its listen address.
    ///
    /// An empty driver list means a single-driver cluster made of `listen`.
    ///
    /// # Errors
    ///
    /// Returns an error if the id is out of range or the listen address is not
    /// in the driver list.
    pub fn resolve(drivers: Vec<String>, listen: &str, driver_id: Option<usize>) -> AppResult<Self> {
        let drivers = if drivers.is_empty() {
            vec![listen.to_owned()]
        } else {
            drivers
        };
        let self_id = match driver_id {
            Some(id) if id < drivers.len() => id,
            Some(id) => {
                return Err(AppError::config(ConfigError::DriverIdOutOfRange {
                    id,
                    size: drivers.len(),
                }));
            }
            None => drivers
                .iter()
                .position(|addr| addr == listen)
                .ok_or_else(|| {
                    AppError::config(ConfigError::DriverIdUnresolved {
                        listen: listen.to_owned(),
                    })
                })?,
        };
        Ok(Self { drivers, self_id })
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.drivers.len()
    }

    #[must_use]
    pub const fn self_id(&self) -> usize {
        self.self_id
    }

    #[must_use]
    pub fn address(&self, id: usize) -> Option<&str> {
        self.drivers.get(id).map(String::as_str)
    }

    /// Every other driver with its id.
    pub fn peers(&self) -> impl Iterator<Item = (usize, &str)> {
        let self_id = self.self_id;
        self.drivers
            .iter()
            .enumerate()
            .filter(move |(id, _)| *id != self_id)
            .map(|(id, addr)| (id, addr.as_str()))
    }
}
