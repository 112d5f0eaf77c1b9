use std::fmt;

use anyhow::Context;
use embedded_graphics::Drawable;
use embedded_graphics::draw_target::DrawTarget;
use embedded_graphics::mono_font::MonoTextStyle;
use embedded_graphics::mono_font::ascii::FONT_6X10;
use embedded_graphics::pixelcolor::Rgb565;
use embedded_graphics::prelude::{Point, RgbColor};
use embedded_graphics::text::Text;
use mipidsi::interface::SpiInterface;
use mipidsi::models::ST7789;
use mipidsi::options::{ColorInversion, Orientation, Rotation};
use mipidsi::{Builder, NoResetPin};
use rppal::gpio::{Gpio, InputPin, OutputPin};
use rppal::hal::Delay;
use rppal::spi::{Bus, Mode, SimpleHalSpiDevice, SlaveSelect, Spi};

// Mini PiTFT wiring: SPI0 CE0 for the panel, GPIO 25 for data/command,
// GPIO 22 for the backlight, GPIO 23/24 for the two buttons.
const SPI_CLOCK_HZ: u32 = 64_000_000;
const DC_PIN: u8 = 25;
const BACKLIGHT_PIN: u8 = 22;
const BUTTON_A_PIN: u8 = 23;
const BUTTON_B_PIN: u8 = 24;

// Panel geometry before the landscape rotation.
const PANEL_WIDTH: u16 = 135;
const PANEL_HEIGHT: u16 = 240;
const PANEL_X_OFFSET: u16 = 53;
const PANEL_Y_OFFSET: u16 = 40;

const LINE_HEIGHT: i32 = 12;

/// Render target for the display sink. The sampling loop hands it the
/// prepared text lines and a background color once per cycle.
pub trait Screen {
    fn render(&mut self, lines: &[String], background: Rgb565) -> Result<(), anyhow::Error>;
    fn set_backlight(&mut self, on: bool) -> Result<(), anyhow::Error>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Button {
    A,
    B,
}

/// The two panel buttons, sampled (not edge-triggered) once per cycle.
pub trait ButtonPad {
    fn pressed(&mut self, button: Button) -> bool;
}

type PanelDisplay = mipidsi::Display<
    SpiInterface<'static, SimpleHalSpiDevice, OutputPin>,
    ST7789,
    NoResetPin,
>;

/// ST7789 mini TFT on the SPI bus, rotated to landscape.
pub struct St7789Screen {
    display: PanelDisplay,
    backlight: OutputPin,
}

impl St7789Screen {
    pub fn new() -> Result<St7789Screen, anyhow::Error> {
        let gpio = Gpio::new().context("Failed to initialize GPIO")?;
        let dc = gpio
            .get(DC_PIN)
            .context("Failed to claim data/command pin")?
            .into_output();
        let backlight = gpio
            .get(BACKLIGHT_PIN)
            .context("Failed to claim backlight pin")?
            .into_output();

        let spi = Spi::new(Bus::Spi0, SlaveSelect::Ss0, SPI_CLOCK_HZ, Mode::Mode0)
            .context("Failed to initialize SPI")?;
        let buffer = Box::leak(vec![0u8; 512].into_boxed_slice());
        let interface = SpiInterface::new(SimpleHalSpiDevice::new(spi), dc, buffer);

        let mut display = Builder::new(ST7789, interface)
            .display_size(PANEL_WIDTH, PANEL_HEIGHT)
            .display_offset(PANEL_X_OFFSET, PANEL_Y_OFFSET)
            .invert_colors(ColorInversion::Inverted)
            .orientation(Orientation::new().rotate(Rotation::Deg90))
            .init(&mut Delay)
            .map_err(|e| anyhow::anyhow!("Failed to initialize ST7789: {e:?}"))?;
        display.clear(Rgb565::BLACK).map_err(draw_error)?;

        Ok(St7789Screen { display, backlight })
    }
}

impl Screen for St7789Screen {
    fn render(&mut self, lines: &[String], background: Rgb565) -> Result<(), anyhow::Error> {
        self.display.clear(background).map_err(draw_error)?;

        let style = MonoTextStyle::new(&FONT_6X10, Rgb565::WHITE);
        let mut y = LINE_HEIGHT - 2;
        for line in lines {
            Text::new(line, Point::new(0, y), style)
                .draw(&mut self.display)
                .map_err(draw_error)?;
            y += LINE_HEIGHT;
        }

        Ok(())
    }

    fn set_backlight(&mut self, on: bool) -> Result<(), anyhow::Error> {
        if on {
            self.backlight.set_high();
        } else {
            self.backlight.set_low();
        }
        Ok(())
    }
}

/// The panel's two tactile buttons; pressed pulls the pin low.
pub struct GpioButtons {
    a: InputPin,
    b: InputPin,
}

impl GpioButtons {
    pub fn new() -> Result<GpioButtons, anyhow::Error> {
        let gpio = Gpio::new().context("Failed to initialize GPIO")?;
        let a = gpio
            .get(BUTTON_A_PIN)
            .context("Failed to claim button A pin")?
            .into_input_pullup();
        let b = gpio
            .get(BUTTON_B_PIN)
            .context("Failed to claim button B pin")?
            .into_input_pullup();

        Ok(GpioButtons { a, b })
    }
}

impl ButtonPad for GpioButtons {
    fn pressed(&mut self, button: Button) -> bool {
        match button {
            Button::A => self.a.is_low(),
            Button::B => self.b.is_low(),
        }
    }
}

fn draw_error<E: fmt::Debug>(e: E) -> anyhow::Error {
    anyhow::anyhow!("Display write failed: {e:?}")
}
