use anyhow::Context;
use rppal::i2c::I2c;

use crate::sensor::ParticulateSensor;
use crate::snapshot::PmReading;

pub const I2C_ADDRESS: u16 = 0x12;

pub const FRAME_LEN: usize = 32;
pub const FRAME_START: [u8; 2] = [0x42, 0x4d];

/// Plantower PMSA003I particulate sensor.
///
/// The sensor continuously streams 32-byte frames of big-endian words: a
/// two-byte start marker, a frame length, twelve measurement words, two
/// reserved bytes and a 16-bit additive checksum over everything before it.
#[derive(Debug)]
pub struct Pmsa003i {
    i2c: I2c,
}

impl Pmsa003i {
    pub fn new() -> Result<Pmsa003i, anyhow::Error> {
        let mut i2c = I2c::new().context("Failed to initialize I2C")?;
        i2c.set_slave_address(I2C_ADDRESS)
            .context("Failed to select PMSA003I address")?;

        Ok(Pmsa003i { i2c })
    }
}

impl ParticulateSensor for Pmsa003i {
    fn read(&mut self) -> Result<PmReading, anyhow::Error> {
        let mut frame = [0u8; FRAME_LEN];
        self.i2c
            .read(&mut frame)
            .context("Failed to read frame from PMSA003I")?;

        parse_frame(&frame)
    }
}

pub fn parse_frame(frame: &[u8; FRAME_LEN]) -> Result<PmReading, anyhow::Error> {
    if frame[..2] != FRAME_START {
        return Err(anyhow::anyhow!(
            "Invalid frame start: expected {:02x?}, got {:02x?}",
            FRAME_START,
            &frame[..2]
        ));
    }

    let checksum = calculate_checksum(frame);
    let reported = word(frame, 30);
    if reported != checksum {
        return Err(anyhow::anyhow!(
            "Invalid checksum: expected {}, got {}",
            checksum,
            reported
        ));
    }

    Ok(PmReading {
        pm10_standard: word(frame, 4),
        pm25_standard: word(frame, 6),
        pm100_standard: word(frame, 8),
        pm10_env: word(frame, 10),
        pm25_env: word(frame, 12),
        pm100_env: word(frame, 14),
        particles_03um: word(frame, 16),
        particles_05um: word(frame, 18),
        particles_10um: word(frame, 20),
        particles_25um: word(frame, 22),
        particles_50um: word(frame, 24),
        particles_100um: word(frame, 26),
    })
}

pub fn calculate_checksum(frame: &[u8; FRAME_LEN]) -> u16 {
    frame[..30].iter().map(|&byte| byte as u16).sum()
}

fn word(frame: &[u8; FRAME_LEN], offset: usize) -> u16 {
    u16::from_be_bytes([frame[offset], frame[offset + 1]])
}
