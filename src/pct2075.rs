use anyhow::Context;
use rppal::i2c::I2c;

use crate::sensor::TemperatureProbe;

pub const I2C_ADDRESS: u16 = 0x37;

const REG_TEMP: u8 = 0x00;

/// NXP PCT2075 temperature sensor. The temperature register holds an
/// 11-bit two's-complement value in steps of 0.125 C.
#[derive(Debug)]
pub struct Pct2075 {
    i2c: I2c,
}

impl Pct2075 {
    pub fn new() -> Result<Pct2075, anyhow::Error> {
        let mut i2c = I2c::new().context("Failed to initialize I2C")?;
        i2c.set_slave_address(I2C_ADDRESS)
            .context("Failed to select PCT2075 address")?;

        Ok(Pct2075 { i2c })
    }
}

impl TemperatureProbe for Pct2075 {
    fn read_celsius(&mut self) -> Result<f32, anyhow::Error> {
        let mut response = [0u8; 2];
        self.i2c
            .write_read(&[REG_TEMP], &mut response)
            .context("Failed to read temperature register from PCT2075")?;

        Ok(raw_to_celsius(response))
    }
}

pub fn raw_to_celsius(raw: [u8; 2]) -> f32 {
    (i16::from_be_bytes(raw) >> 5) as f32 * 0.125
}
