use bitflags::bitflags;
use std::fmt;

use crate::v4l2::videodev::v4l2_capability;

bitflags! {
    #[allow(clippy::unreadable_literal)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Flags: u32 {
        const VIDEO_CAPTURE         = 0x00000001;
        const VIDEO_OUTPUT          = 0x00000002;
        const VIDEO_OVERLAY         = 0x00000004;
        const VBI_CAPTURE           = 0x00000010;
        const VBI_OUTPUT            = 0x00000020;
        const SLICED_VBI_CAPTURE    = 0x00000040;
        const SLICED_VBI_OUTPUT     = 0x00000080;
        const RDS_CAPTURE           = 0x00000100;
        const VIDEO_OUTPUT_OVERLAY  = 0x00000200;
        const HW_FREQ_SEEK          = 0x00000400;
        const RDS_OUTPUT            = 0x00000800;

        const VIDEO_CAPTURE_MPLANE  = 0x00001000;
        const VIDEO_OUTPUT_MPLANE   = 0x00002000;
        const VIDEO_M2M_MPLANE      = 0x00004000;
        const VIDEO_M2M             = 0x00008000;

        const TUNER                 = 0x00010000;
        const AUDIO                 = 0x00020000;
        const RADIO                 = 0x00040000;
        const MODULATOR             = 0x00080000;

        const SDR_CAPTURE           = 0x00100000;
        const EXT_PIX_FORMAT        = 0x00200000;
        const SDR_OUTPUT            = 0x00400000;
        const META_CAPTURE          = 0x00800000;

        const READ_WRITE            = 0x01000000;
        const ASYNC_IO              = 0x02000000;
        const STREAMING             = 0x04000000;
        const META_OUTPUT           = 0x08000000;

        const TOUCH                 = 0x10000000;
        const IO_MC                 = 0x20000000;

        const DEVICE_CAPS           = 0x80000000;
    }
}

impl From<u32> for Flags {
    fn from(flags: u32) -> Self {
        Self::from_bits_retain(flags)
    }
}

impl From<Flags> for u32 {
    fn from(flags: Flags) -> Self {
        flags.bits()
    }
}

impl fmt::Display for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone)]
/// Device capabilities
pub struct Capabilities {
    /// Driver name, e.g. uvc for usb video class devices
    pub driver: String,
    /// Card name
    pub card: String,
    /// Bus name, e.g. USB or PCI
    pub bus: String,
    /// Version number MAJOR.MINOR.PATCH
    pub version: (u8, u8, u8),

    /// Capabilities of the physical device as a whole
    pub capabilities: Flags,
    /// Capabilities of the opened node, if the driver reports them
    pub device_caps: Option<Flags>,
}

impl Capabilities {
    /// Returns the capability set that applies to the opened device node
    ///
    /// Drivers setting [`Flags::DEVICE_CAPS`] describe the node itself in `device_caps`, which
    /// is narrower than the physical device. Older drivers only fill in `capabilities`.
    pub fn effective(&self) -> Flags {
        self.device_caps.unwrap_or(self.capabilities)
    }
}

fn c_str(raw: &[u8]) -> String {
    let end = raw.iter().position(|&c| c == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

impl From<v4l2_capability> for Capabilities {
    fn from(cap: v4l2_capability) -> Self {
        let capabilities = Flags::from(cap.capabilities);
        let device_caps = if capabilities.contains(Flags::DEVICE_CAPS) {
            Some(Flags::from(cap.device_caps))
        } else {
            None
        };

        Capabilities {
            driver: c_str(&cap.driver),
            card: c_str(&cap.card),
            bus: c_str(&cap.bus_info),
            version: (
                ((cap.version >> 16) & 0xff) as u8,
                ((cap.version >> 8) & 0xff) as u8,
                (cap.version & 0xff) as u8,
            ),
            capabilities,
            device_caps,
        }
    }
}

impl fmt::Display for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Driver      : {}", self.driver)?;
        writeln!(f, "Card        : {}", self.card)?;
        writeln!(f, "Bus         : {}", self.bus)?;
        writeln!(
            f,
            "Version     : {}.{}.{}",
            self.version.0, self.version.1, self.version.2
        )?;
        writeln!(f, "Capabilities: {}", self.capabilities)?;
        if let Some(caps) = self.device_caps {
            writeln!(f, "Device caps : {}", caps)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem;

    fn raw(capabilities: u32, device_caps: u32) -> v4l2_capability {
        let mut cap: v4l2_capability = unsafe { mem::zeroed() };
        cap.driver[..3].copy_from_slice(b"uvc");
        cap.card[..6].copy_from_slice(b"Webcam");
        cap.bus_info[..9].copy_from_slice(b"usb-0:1.2");
        cap.version = (6 << 16) | (1 << 8) | 7;
        cap.capabilities = capabilities;
        cap.device_caps = device_caps;
        cap
    }

    #[test]
    fn strings_stop_at_nul() {
        let caps = Capabilities::from(raw(0, 0));
        assert_eq!(caps.driver, "uvc");
        assert_eq!(caps.card, "Webcam");
        assert_eq!(caps.bus, "usb-0:1.2");
        assert_eq!(caps.version, (6, 1, 7));
    }

    #[test]
    fn device_caps_take_precedence() {
        let all = Flags::VIDEO_CAPTURE | Flags::META_CAPTURE | Flags::STREAMING | Flags::DEVICE_CAPS;
        let all = all.bits();
        let node = (Flags::META_CAPTURE | Flags::STREAMING).bits();
        let caps = Capabilities::from(raw(all, node));
        assert!(!caps.effective().contains(Flags::VIDEO_CAPTURE));
        assert!(caps.effective().contains(Flags::META_CAPTURE));
    }

    #[test]
    fn legacy_drivers_use_physical_caps() {
        let all = (Flags::VIDEO_CAPTURE | Flags::STREAMING).bits();
        let caps = Capabilities::from(raw(all, 0));
        assert_eq!(caps.device_caps, None);
        assert!(caps
            .effective()
            .contains(Flags::VIDEO_CAPTURE | Flags::STREAMING));
    }
}
