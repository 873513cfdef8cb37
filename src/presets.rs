/// A canned message and program pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Preset {
    pub message: &'static str,
    pub program: &'static str,
}

/// Number of presets, addressed 1-based.
pub const PRESET_COUNT: usize = 3;

/// Look up a preset by its 1-based index.
pub fn preset(index: usize) -> Option<Preset> {
    match index {
        1 => Some(Preset {
            message: "HOLA MUNDO",
            program: "0x01 0x02 0x01 0x02 0x01 0x02 0x01 0x02 0x01 0x02 0x01 0x02 0x01 0x02 0x01 0x02 0x01 0x02 0x01 0x04 0xff",
        }),
        2 => Some(Preset {
            message: "SOS",
            program: "0x01 0x02 0x01 0x02 0x01 0x03 0x04 0xff",
        }),
        3 => Some(Preset {
            message: "TEST",
            program: "0x01 0x03 0x05 0x02 0x01 0x03 0xff",
        }),
        _ => None,
    }
}
