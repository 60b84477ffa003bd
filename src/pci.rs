use std::fmt;
use std::str::FromStr;

use crate::error::Error;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PciAddress {
    pub bus: u8,
    pub device: u8,
    pub function: u8,
}

impl FromStr for PciAddress {
    type Err = Error;

    /// Parses `bus:device.function` in hex, with an optional `domain:` prefix.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || Error::Pci(format!("bad PCI address '{s}'"));
        let mut parts: Vec<&str> = s.split(&[':', '.'][..]).collect();
        if parts.len() == 4 {
            if u16::from_str_radix(parts[0], 16).map_err(|_| bad())? != 0 {
                return Err(Error::Pci(format!("PCI domain in '{s}' is not supported")));
            }
            parts.remove(0);
        }
        if parts.len() != 3 {
            return Err(bad());
        }
        let address = PciAddress {
            bus: u8::from_str_radix(parts[0], 16).map_err(|_| bad())?,
            device: u8::from_str_radix(parts[1], 16).map_err(|_| bad())?,
            function: u8::from_str_radix(parts[2], 16).map_err(|_| bad())?,
        };
        if address.device > 0x1F || address.function > 0x7 {
            return Err(bad());
        }
        Ok(address)
    }
}

impl fmt::Display for PciAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02x}:{:02x}.{:x}", self.bus, self.device, self.function)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_short_and_domain_forms() {
        let short: PciAddress = "83:00.1".parse().unwrap();
        assert_eq!(short, PciAddress { bus: 0x83, device: 0, function: 1 });
        let long: PciAddress = "0000:83:00.1".parse().unwrap();
        assert_eq!(long, short);
        assert_eq!(short.to_string(), "83:00.1");
    }

    #[test]
    fn rejects_garbage() {
        assert!("83:00".parse::<PciAddress>().is_err());
        assert!("zz:00.0".parse::<PciAddress>().is_err());
        assert!("00:20.0".parse::<PciAddress>().is_err());
        assert!("0001:00:00.0".parse::<PciAddress>().is_err());
    }
}
