//! EEPROM/EPROM programming sequences.
//!
//! Each operation is four single-byte writes through the talker:
//!
//! ```text
//! control <- latch      arm the cell latch (and erase mode)
//! address <- data       latched, not yet programmed
//! control <- enable     programming voltage on
//!   ... hold ...
//! control <- 0x00       voltage off, latch released
//! ```

use crate::error::Result;
use crate::port::Port;
use crate::protocol::talker::Talker;
use crate::target::chip::registers;
use log::trace;
use std::thread;
use std::time::Duration;

/// A cell-level programming operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CellOperation {
    /// Program an erased EEPROM byte.
    EepromProgram,
    /// Erase the whole EEPROM array (and CONFIG).
    EepromBulkErase,
    /// Erase the 16-byte EEPROM row holding the address.
    EepromRowErase,
    /// Erase one EEPROM byte.
    EepromByteErase,
    /// Program an EPROM byte through PPROG.
    EpromProgram,
    /// Program an EPROM byte through EPROG (MC68HC711E20, 12 V on VPPE).
    EpromProgramE20,
}

impl CellOperation {
    /// Register driving the sequence.
    pub fn control_register(self) -> u16 {
        match self {
            Self::EpromProgramE20 => registers::EPROG,
            _ => registers::PPROG,
        }
    }

    /// Latch and enable values written to the control register.
    pub fn control_values(self) -> (u8, u8) {
        match self {
            Self::EepromProgram => (0x02, 0x03),
            Self::EepromBulkErase => (0x06, 0x07),
            Self::EepromRowErase => (0x0E, 0x0F),
            Self::EepromByteErase => (0x16, 0x17),
            Self::EpromProgram | Self::EpromProgramE20 => (0x20, 0x21),
        }
    }
}

/// EEPROM erase granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EraseMode {
    /// Whole array.
    Bulk,
    /// 16-byte row.
    Row,
    /// Single byte.
    Byte,
}

impl EraseMode {
    /// Matching cell operation.
    pub fn operation(self) -> CellOperation {
        match self {
            Self::Bulk => CellOperation::EepromBulkErase,
            Self::Row => CellOperation::EepromRowErase,
            Self::Byte => CellOperation::EepromByteErase,
        }
    }
}

/// EPROM control register selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum EpromRegister {
    /// PPROG (most EPROM parts).
    #[default]
    Pprog,
    /// EPROG (MC68HC711E20).
    Eprog,
}

impl EpromRegister {
    /// Matching cell operation.
    pub fn operation(self) -> CellOperation {
        match self {
            Self::Pprog => CellOperation::EpromProgram,
            Self::Eprog => CellOperation::EpromProgramE20,
        }
    }
}

/// Run `op` on `address`.
///
/// For erase operations `value` is a don't-care dummy byte.
pub fn run<P: Port>(
    talker: &mut Talker<'_, P>,
    op: CellOperation,
    address: u16,
    value: u8,
    delay: Duration,
) -> Result<()> {
    let control = op.control_register();
    let (latch, enable) = op.control_values();
    trace!("{op:?} at 0x{address:04X} (0x{value:02X})");

    talker.write_byte(control, latch)?;
    talker.write_byte(address, value)?;
    talker.write_byte(control, enable)?;
    if !delay.is_zero() {
        thread::sleep(delay);
    }
    talker.write_byte(control, 0x00)
}

/// Erase then program one EEPROM byte.
///
/// CONFIG is bulk erased rather than byte erased: byte erase of CONFIG is
/// not available on every part.
pub fn program_eeprom_byte<P: Port>(
    talker: &mut Talker<'_, P>,
    address: u16,
    value: u8,
    delay: Duration,
) -> Result<()> {
    let erase = if address == registers::CONFIG {
        CellOperation::EepromBulkErase
    } else {
        CellOperation::EepromByteErase
    };
    run(talker, erase, address, value, delay)?;
    run(talker, CellOperation::EepromProgram, address, value, delay)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::mock::SimulatedMcu;
    use crate::target::chip::{SessionConfig, TalkerProtocol};

    fn session(protocol: TalkerProtocol) -> SessionConfig {
        SessionConfig::default().with_protocol(protocol)
    }

    #[test]
    fn test_control_values() {
        assert_eq!(CellOperation::EepromProgram.control_values(), (0x02, 0x03));
        assert_eq!(CellOperation::EepromBulkErase.control_values(), (0x06, 0x07));
        assert_eq!(CellOperation::EepromRowErase.control_values(), (0x0E, 0x0F));
        assert_eq!(CellOperation::EepromByteErase.control_values(), (0x16, 0x17));
        assert_eq!(CellOperation::EpromProgram.control_register(), registers::PPROG);
        assert_eq!(CellOperation::EpromProgramE20.control_register(), registers::EPROG);
        assert_eq!(CellOperation::EpromProgramE20.control_values(), (0x20, 0x21));
    }

    #[test]
    fn test_program_sequence_on_the_wire() {
        let config = session(TalkerProtocol::Echo);
        let mut mcu = SimulatedMcu::talker(TalkerProtocol::Echo).with_memory(0xB600, &[0xFF]);
        let mut talker = Talker::new(&mut mcu, &config);
        run(&mut talker, CellOperation::EepromProgram, 0xB600, 0x5A, Duration::ZERO).unwrap();
        drop(talker);

        assert_eq!(mcu.pokes, vec![
            (registers::PPROG, 0x02),
            (0xB600, 0x5A),
            (registers::PPROG, 0x03),
            (registers::PPROG, 0x00),
        ]);
        assert_eq!(mcu.memory(0xB600), 0x5A);
    }

    #[test]
    fn test_erase_then_program_byte() {
        let config = session(TalkerProtocol::Echo);
        let mut mcu = SimulatedMcu::talker(TalkerProtocol::Echo).with_memory(0xB610, &[0x00, 0x11]);
        let mut talker = Talker::new(&mut mcu, &config);
        program_eeprom_byte(&mut talker, 0xB610, 0xC3, Duration::ZERO).unwrap();
        drop(talker);

        assert_eq!(mcu.pokes[0], (registers::PPROG, 0x16));
        assert_eq!(mcu.pokes[4], (registers::PPROG, 0x02));
        assert_eq!(mcu.memory(0xB610), 0xC3);
        // Neighbour untouched by byte erase
        assert_eq!(mcu.memory(0xB611), 0x11);
    }

    #[test]
    fn test_config_uses_bulk_erase() {
        let config = session(TalkerProtocol::Echo);
        let mut mcu = SimulatedMcu::talker(TalkerProtocol::Echo)
            .with_memory(registers::CONFIG, &[0x0C])
            .with_memory(0xB700, &[0x00]);
        let mut talker = Talker::new(&mut mcu, &config);
        program_eeprom_byte(&mut talker, registers::CONFIG, 0x0D, Duration::ZERO).unwrap();
        drop(talker);

        assert_eq!(mcu.pokes[0], (registers::PPROG, 0x06));
        assert_eq!(mcu.memory(registers::CONFIG), 0x0D);
        assert_eq!(mcu.memory(0xB700), 0xFF);
    }

    #[test]
    fn test_row_erase_clears_row() {
        let config = session(TalkerProtocol::Opcode);
        let mut mcu = SimulatedMcu::talker(TalkerProtocol::Opcode).with_memory(0xB620, &[0u8; 32]);
        let mut talker = Talker::new(&mut mcu, &config);
        run(&mut talker, EraseMode::Row.operation(), 0xB625, 0x00, Duration::ZERO).unwrap();
        drop(talker);

        assert!((0xB620..=0xB62F).all(|a| mcu.memory(a) == 0xFF));
        assert_eq!(mcu.memory(0xB630), 0x00);
    }

    #[test]
    fn test_e20_uses_eprog() {
        let config = session(TalkerProtocol::Echo);
        let mut mcu = SimulatedMcu::talker(TalkerProtocol::Echo);
        let mut talker = Talker::new(&mut mcu, &config);
        run(&mut talker, EpromRegister::Eprog.operation(), 0xD000, 0x7E, Duration::ZERO).unwrap();
        drop(talker);

        assert!(mcu.pokes.iter().all(|&(a, _)| a != registers::PPROG));
        assert_eq!(mcu.memory(0xD000), 0x7E);
    }
}
