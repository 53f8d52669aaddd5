//! GeoIP country lookup (§4.4, §9). Process-wide, loaded once at
//! startup, immutable thereafter — no locking needed past construction.

use maxminddb::{geoip2, Reader};
use std::net::IpAddr;
use tracing::{info, warn};

pub struct GeoIpReader {
    reader: Option<Reader<Vec<u8>>>,
}

impl GeoIpReader {
    /// Loads the database at `path`, if given. A missing or unreadable
    /// path degrades to "no GeoIP rules ever match" rather than
    /// refusing to start — geo routing is one of several rule
    /// conditions, not a precondition for the relay loop.
    pub fn load(path: Option<&str>) -> Self {
        let reader = path.and_then(|path| match Reader::open_readfile(path) {
            Ok(reader) => {
                info!(%path, "loaded GeoIP database");
                Some(reader)
            }
            Err(e) => {
                warn!(%path, error = %e, "failed to load GeoIP database, geo rules will never match");
                None
            }
        });
        GeoIpReader { reader }
    }

    /// ISO-2 country code for `ip`, or empty string if unknown.
    pub fn country(&self, ip: IpAddr) -> String {
        let Some(reader) = self.reader.as_ref() else {
            return String::new();
        };
        match reader.lookup::<geoip2::Country>(ip) {
            Ok(country) => country
                .country
                .and_then(|c| c.iso_code)
                .map(|code| code.to_uppercase())
                .unwrap_or_default(),
            Err(_) => String::new(),
        }
    }
}
