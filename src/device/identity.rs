//! Static device description: USB identity, known chipsets, fixed capabilities

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::driver::TunerType;

/// Sample rates offered to callers, in Hz
pub const SAMPLE_RATES: [u32; 2] = [960_000, 2_400_000];

/// Lowest tunable frequency (R820T), in Hz
pub const MIN_FREQUENCY: u32 = 24_000_000;

/// Highest tunable frequency (R820T), in Hz
pub const MAX_FREQUENCY: u32 = 1_766_000_000;

/// Async read buffer length in bytes (16K I/Q pairs)
pub const ASYNC_BUF_LEN: u32 = 16384 * 2;

/// Async read buffer count, 0 lets the driver choose
pub const ASYNC_BUF_NUM: u32 = 0;

/// RTL2832U based dongles recognized by librtlsdr
const KNOWN_DEVICES: &[(u16, u16, &str)] = &[
    (0x0bda, 0x2832, "Generic RTL2832U"),
    (0x0bda, 0x2838, "Generic RTL2832U OEM"),
    (0x0413, 0x6680, "DigitalNow Quad DVB-T PCI-E card"),
    (0x0413, 0x6f0f, "Leadtek WinFast DTV Dongle mini D"),
    (0x0458, 0x707f, "Genius TVGo DVB-T03 USB dongle (Ver. B)"),
    (0x0ccd, 0x00a9, "Terratec Cinergy T Stick Black (rev 1)"),
    (0x0ccd, 0x00b3, "Terratec NOXON DAB/DAB+ USB dongle (rev 1)"),
    (0x0ccd, 0x00b4, "Terratec Deutschlandradio DAB Stick"),
    (0x0ccd, 0x00b5, "Terratec NOXON DAB Stick - Radio Energy"),
    (0x0ccd, 0x00b7, "Terratec Media Broadcast DAB Stick"),
    (0x0ccd, 0x00b8, "Terratec BR DAB Stick"),
    (0x0ccd, 0x00b9, "Terratec WDR DAB Stick"),
    (0x0ccd, 0x00c0, "Terratec MuellerVerlag DAB Stick"),
    (0x0ccd, 0x00c6, "Terratec Fraunhofer DAB Stick"),
    (0x0ccd, 0x00d3, "Terratec Cinergy T Stick RC (Rev.3)"),
    (0x0ccd, 0x00d7, "Terratec T Stick PLUS"),
    (0x0ccd, 0x00e0, "Terratec NOXON DAB/DAB+ USB dongle (rev 2)"),
    (0x1554, 0x5020, "PixelView PV-DT235U(RN)"),
    (0x15f4, 0x0131, "Astrometa DVB-T/DVB-T2"),
    (0x15f4, 0x0133, "HanfTek DAB+FM+DVB-T"),
    (0x185b, 0x0620, "Compro Videomate U620F"),
    (0x185b, 0x0650, "Compro Videomate U650F"),
    (0x185b, 0x0680, "Compro Videomate U680F"),
    (0x1b80, 0xd393, "GIGABYTE GT-U7300"),
    (0x1b80, 0xd394, "DIKOM USB-DVBT HD"),
    (0x1b80, 0xd395, "Peak 102569AGPK"),
    (0x1b80, 0xd397, "KWorld KW-UB450-T USB DVB-T Pico TV"),
    (0x1b80, 0xd398, "Zaapa ZT-MINDVBZP"),
    (0x1b80, 0xd39d, "SVEON STV20 DVB-T USB & FM"),
    (0x1b80, 0xd3a4, "Twintech UT-40"),
    (0x1b80, 0xd3a8, "ASUS U3100MINI_PLUS_V2"),
    (0x1b80, 0xd3af, "SVEON STV27 DVB-T USB & FM"),
    (0x1b80, 0xd3b0, "SVEON STV21 DVB-T USB & FM"),
    (0x1d19, 0x1101, "Dexatek DK DVB-T Dongle (Logilink VG0002A)"),
    (0x1d19, 0x1102, "Dexatek DK DVB-T Dongle (MSI DigiVox mini II V3.0)"),
    (0x1d19, 0x1103, "Dexatek Technology Ltd. DK 5217 DVB-T Dongle"),
    (0x1d19, 0x1104, "MSI DigiVox Micro HD"),
    (0x1f4d, 0xa803, "Sweex DVB-T USB"),
    (0x1f4d, 0xb803, "GTek T803"),
    (0x1f4d, 0xc803, "Lifeview LV5TDeluxe"),
    (0x1f4d, 0xd286, "MyGica TD312"),
    (0x1f4d, 0xd803, "PROlectrix DV107669"),
];

/// Whether a vendor/product pair belongs to a supported chipset
pub fn is_known_device(vid: u16, pid: u16) -> bool {
    known_device_name(vid, pid).is_some()
}

pub fn known_device_name(vid: u16, pid: u16) -> Option<&'static str> {
    KNOWN_DEVICES
        .iter()
        .find(|&&(v, p, _)| v == vid && p == pid)
        .map(|&(_, _, name)| name)
}

/// A device as reported by USB discovery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsbDescriptor {
    pub vendor_id: u16,
    pub product_id: u16,
    pub vendor_name: String,
    pub product_name: String,
    pub serial: String,
}

impl UsbDescriptor {
    pub fn new(
        vendor_id: u16,
        product_id: u16,
        vendor_name: impl Into<String>,
        product_name: impl Into<String>,
        serial: impl Into<String>,
    ) -> Self {
        Self {
            vendor_id,
            product_id,
            vendor_name: vendor_name.into(),
            product_name: product_name.into(),
            serial: serial.into(),
        }
    }

    pub fn is_supported(&self) -> bool {
        is_known_device(self.vendor_id, self.product_id)
    }
}

/// Immutable identity of an adopted device
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceIdentity {
    vendor: String,
    product: String,
    serial: String,
    name: String,
}

impl DeviceIdentity {
    pub fn from_descriptor(desc: &UsbDescriptor) -> Self {
        let name = format!("{} {} SN: {}", desc.vendor_name, desc.product_name, desc.serial);
        Self {
            vendor: desc.vendor_name.clone(),
            product: desc.product_name.clone(),
            serial: desc.serial.clone(),
            name,
        }
    }

    pub fn vendor(&self) -> &str {
        &self.vendor
    }

    pub fn product(&self) -> &str {
        &self.product
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }

    /// Display name, "<vendor> <product> SN: <serial>"
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// What the driver reported during one-time initialization
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capabilities {
    pub tuner: TunerType,
    /// Discrete gain steps in tenths of a dB
    pub gains: Vec<i32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_devices() {
        assert!(is_known_device(0x0bda, 0x2838));
        assert!(is_known_device(0x0bda, 0x2832));
        assert_eq!(known_device_name(0x1d19, 0x1101), Some("Dexatek DK DVB-T Dongle (Logilink VG0002A)"));
        assert!(!is_known_device(0x1d50, 0x60a1)); // Airspy
        assert!(!is_known_device(0x0bda, 0x0000));
    }

    #[test]
    fn test_identity_display_name() {
        let desc = UsbDescriptor::new(0x0bda, 0x2838, "Realtek", "RTL2838UHIDIR", "00000001");
        let id = DeviceIdentity::from_descriptor(&desc);
        assert_eq!(id.name(), "Realtek RTL2838UHIDIR SN: 00000001");
        assert_eq!(id.vendor(), "Realtek");
        assert_eq!(id.product(), "RTL2838UHIDIR");
        assert_eq!(id.serial(), "00000001");
        assert_eq!(id.to_string(), id.name());
    }

    #[test]
    fn test_fixed_capabilities() {
        assert_eq!(SAMPLE_RATES.iter().max(), Some(&2_400_000));
        assert!(MIN_FREQUENCY < MAX_FREQUENCY);
        assert_eq!(ASYNC_BUF_LEN, 32768);
    }
}
