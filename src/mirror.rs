use crate::codec::{self, Command};

/// Host copy of the bridge's select, address and data registers.
///
/// Delta commands are computed against this copy, so it has to track the
/// hardware exactly: a lane is only ever updated after the command that
/// changes it on the bridge has been sent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Mirror {
    sel: u8,
    adr: u32,
    dat: u32,
}

impl Mirror {
    pub const fn new() -> Self {
        Self {
            sel: 0,
            adr: 0,
            dat: 0,
        }
    }

    pub fn sel(&self) -> u8 {
        self.sel
    }

    pub fn adr(&self) -> u32 {
        self.adr
    }

    pub fn dat(&self) -> u32 {
        self.dat
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn sel_delta(&self, sel: u8) -> Option<Command> {
        (self.sel != sel).then_some(Command::SetSel(sel))
    }

    pub fn adr_delta(&self, adr: u32) -> Option<Command> {
        let lanes = codec::changed_lanes(self.adr, adr);
        (lanes != 0).then_some(Command::SetAdr { lanes, adr })
    }

    /// Only lanes covered by `sel` are compared.
    pub fn dat_delta(&self, sel: u8, dat: u32) -> Option<Command> {
        let lanes = codec::changed_lanes(self.dat, dat) & sel;
        (lanes != 0).then_some(Command::SetDat { lanes, dat })
    }

    /// Records a strobe: select and address as sent, then the bridge's
    /// post-transaction address increment of `word_step` words.
    pub fn commit_strobe(&mut self, sel: u8, adr: u32, word_step: i8) {
        self.sel = sel;
        self.adr = adr.wrapping_add((i32::from(word_step) * 4) as u32);
    }

    pub fn commit_dat(&mut self, sel: u8, dat: u32) {
        let mask = codec::lane_mask(sel);
        self.dat = (self.dat & !mask) | (dat & mask);
    }
}
