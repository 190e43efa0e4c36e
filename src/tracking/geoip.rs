//! IP geolocation backed by a memory-mapped MaxMind City database

use anyhow::{Context, Result};
use maxminddb::{geoip2, Mmap, Reader};
use std::net::IpAddr;
use std::sync::Arc;

use super::collaborators::GeoLocator;

/// Location stored on a session. Every field is optional: private ranges and
/// unknown addresses resolve to nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GeoLocation {
    /// ISO 3166-1 alpha-2
    pub country: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
}

#[derive(Clone)]
pub struct GeoIpService {
    reader: Arc<Reader<Mmap>>,
}

impl GeoIpService {
    /// Open a GeoLite2-City or GeoIP2-City `.mmdb` file
    pub fn open(path: &str) -> Result<Self> {
        let reader = unsafe { Reader::open_mmap(path) }
            .with_context(|| format!("Failed to open GeoIP City database at {}", path))?;

        Ok(Self {
            reader: Arc::new(reader),
        })
    }

    pub fn lookup(&self, ip: IpAddr) -> GeoLocation {
        let Ok(result) = self.reader.lookup(ip) else {
            return GeoLocation::default();
        };

        if let Ok(Some(city)) = result.decode::<geoip2::City>() {
            return GeoLocation {
                country: city.country.iso_code.map(str::to_string),
                region: city
                    .subdivisions
                    .first()
                    .and_then(|s| s.iso_code.or(s.names.english))
                    .map(str::to_string),
                city: city.city.names.english.map(str::to_string),
            };
        }

        // Country-level databases only carry the country block
        match result.decode::<geoip2::Country>() {
            Ok(Some(country)) => GeoLocation {
                country: country.country.iso_code.map(str::to_string),
                ..Default::default()
            },
            _ => GeoLocation::default(),
        }
    }
}

impl GeoLocator for GeoIpService {
    fn locate(&self, ip: IpAddr) -> GeoLocation {
        self.lookup(ip)
    }
}
