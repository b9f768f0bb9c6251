//! nRF24L01+ transceiver driver.
//!
//! Every operation is one chip-select frame: CSN low, settle, command
//! byte, zero or more data bytes (each followed by the same settle
//! delay), CSN high. CSN must stay low for the whole exchange — releasing
//! it mid-frame corrupts the part's command state machine — so the five
//! protocol operations are all built from the same `begin`/`exchange`/
//! `end` primitives rather than framing themselves.
//!
//! The driver programs one fixed transmit-only configuration at start-up
//! and offers `send` as its sole runtime operation. Auto-acknowledgement
//! is disabled by configuration, so a disconnected or miswired part is
//! indistinguishable from a working one; no verification is attempted.

use embedded_hal::blocking::delay::{DelayMs, DelayUs};
use embedded_hal::digital::v2::OutputPin;
use embedded_hal::spi::FullDuplex;
use nb::block;

use crate::registers::{
    Config, Register, NOP, R_REGISTER, R_RX_PAYLOAD, W_REGISTER, W_TX_PAYLOAD,
};
use crate::FRAME_LEN;

/// Pause between SPI protocol steps, in microseconds.
const SETTLE_DELAY_US: u16 = 100;
/// Power-on and post-configuration settling time.
const STARTUP_DELAY_MS: u16 = 100;
/// 2.400 GHz + channel MHz.
const RF_CHANNEL: u8 = 0x01;
/// 1 Mbps air rate, 0 dBm output power.
const RF_SETUP_1MBPS_0DBM: u8 = 0x07;
/// 750 us retry delay, 15 retries. Inert while auto-ack is off, but
/// programmed anyway so enabling acknowledgement later needs no other
/// change.
const RETRY_SETUP: u8 = 0x2F;
/// The single byte repeated over the full 5-byte pipe address. Both ends
/// of the link are programmed with the same address.
const PIPE_ADDRESS: u8 = 0x12;
/// SETUP_AW code for 5-byte addresses.
const ADDRESS_WIDTH_CODE: u8 = 0x03;
const ADDRESS_LEN: u8 = 5;

/// Bus or pin fault raised below the protocol layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error<SPI, PIN> {
    Spi(SPI),
    Pin(PIN),
}

/// nRF24L01 on an SPI bus with dedicated chip-select and chip-enable
/// lines.
pub struct Nrf24<SPI, CSN, CE, DELAY> {
    spi: SPI,
    csn: CSN,
    ce: CE,
    delay: DELAY,
}

impl<SPI, CSN, CE, DELAY, SpiE, PinE> Nrf24<SPI, CSN, CE, DELAY>
where
    SPI: FullDuplex<u8, Error = SpiE>,
    CSN: OutputPin<Error = PinE>,
    CE: OutputPin<Error = PinE>,
    DELAY: DelayUs<u16> + DelayMs<u16>,
{
    pub fn new(spi: SPI, csn: CSN, ce: CE, delay: DELAY) -> Self {
        Nrf24 {
            spi,
            csn,
            ce,
            delay,
        }
    }

    /// Bring the part from power-on to the fixed operating configuration:
    /// auto-ack off, pipe 0 only, 5-byte address, fixed channel and data
    /// rate, 32-byte payloads, primary transmitter with CRC disabled.
    ///
    /// Later writes assume earlier ones have landed; keep the order.
    pub fn init(&mut self) -> Result<(), Error<SpiE, PinE>> {
        // part inert while it powers up
        self.csn.set_high().map_err(Error::Pin)?;
        self.ce.set_low().map_err(Error::Pin)?;
        self.delay.delay_ms(STARTUP_DELAY_MS);

        self.write_register(Register::EnAa, 0x00, 1)?;
        self.write_register(Register::SetupRetr, RETRY_SETUP, 1)?;
        // data pipe 0 only
        self.write_register(Register::EnRxAddr, 0x01, 1)?;
        self.write_register(Register::SetupAw, ADDRESS_WIDTH_CODE, 1)?;
        self.write_register(Register::RfCh, RF_CHANNEL, 1)?;
        self.write_register(Register::RfSetup, RF_SETUP_1MBPS_0DBM, 1)?;
        self.write_register(Register::RxAddrP0, PIPE_ADDRESS, ADDRESS_LEN)?;
        self.write_register(Register::TxAddr, PIPE_ADDRESS, ADDRESS_LEN)?;
        self.write_register(Register::RxPwP0, FRAME_LEN as u8, 1)?;
        let config = Config::PWR_UP | Config::MASK_MAX_RT;
        self.write_register(Register::Config, config.bits(), 1)?;

        self.delay.delay_ms(STARTUP_DELAY_MS);
        Ok(())
    }

    /// Raise CE. With the TX FIFO empty the part sits in standby and
    /// transmits as soon as a payload is written.
    pub fn enable(&mut self) -> Result<(), Error<SpiE, PinE>> {
        self.ce.set_high().map_err(Error::Pin)
    }

    /// Queue one payload for transmission. Fire-and-forget: with
    /// acknowledgement disabled there is no way to observe whether the
    /// peer received the frame, and none is attempted. The returned error
    /// only ever reports a bus or pin fault.
    ///
    /// `payload` must be at most [`FRAME_LEN`] bytes.
    pub fn send(&mut self, payload: &[u8]) -> Result<(), Error<SpiE, PinE>> {
        debug_assert!(payload.len() <= FRAME_LEN);
        self.begin(W_TX_PAYLOAD)?;
        for &byte in payload {
            self.exchange(byte)?;
        }
        self.end()
    }

    /// Read one register.
    pub fn read_register(&mut self, reg: Register) -> Result<u8, Error<SpiE, PinE>> {
        self.begin(R_REGISTER | reg.addr())?;
        let value = self.exchange(NOP)?;
        self.end()?;
        Ok(value)
    }

    /// Write `value` to `reg`, repeated `count` times. Multi-byte fields
    /// (the 5-byte pipe addresses) are written by repetition.
    pub fn write_register(
        &mut self,
        reg: Register,
        value: u8,
        count: u8,
    ) -> Result<(), Error<SpiE, PinE>> {
        self.begin(W_REGISTER | reg.addr())?;
        for _ in 0..count {
            self.exchange(value)?;
        }
        self.end()
    }

    /// Pop one received payload from the RX FIFO. The transmit-only
    /// firmware never calls this; it completes the command set.
    pub fn read_payload(&mut self, buf: &mut [u8; FRAME_LEN]) -> Result<(), Error<SpiE, PinE>> {
        self.begin(R_RX_PAYLOAD)?;
        for byte in buf.iter_mut() {
            *byte = self.exchange(NOP)?;
        }
        self.end()
    }

    /// Status probe: a bare NOP frame whose command-byte response is the
    /// STATUS register.
    pub fn status(&mut self) -> Result<u8, Error<SpiE, PinE>> {
        let status = self.begin(NOP)?;
        self.end()?;
        Ok(status)
    }

    /// Release the bus, pins and delay.
    pub fn release(self) -> (SPI, CSN, CE, DELAY) {
        (self.spi, self.csn, self.ce, self.delay)
    }

    /// Assert CSN and clock out the command byte, returning the status
    /// byte the part shifts back. CSN stays low until `end`.
    fn begin(&mut self, command: u8) -> Result<u8, Error<SpiE, PinE>> {
        self.csn.set_low().map_err(Error::Pin)?;
        self.delay.delay_us(SETTLE_DELAY_US);
        self.exchange(command)
    }

    /// Exchange one byte, then hold for the settle delay.
    fn exchange(&mut self, byte: u8) -> Result<u8, Error<SpiE, PinE>> {
        block!(self.spi.send(byte)).map_err(Error::Spi)?;
        let response = block!(self.spi.read()).map_err(Error::Spi)?;
        self.delay.delay_us(SETTLE_DELAY_US);
        Ok(response)
    }

    fn end(&mut self) -> Result<(), Error<SpiE, PinE>> {
        self.csn.set_high().map_err(Error::Pin)
    }
}
