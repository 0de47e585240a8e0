//! LedRemote wire protocol - command/response frames
//!
//! Every frame is exactly two bytes: byte 0 carries the data (the LED state),
//! byte 1 carries the footer that says what kind of frame it is.

pub mod ble;

// Frame layout
pub const FRAME_LEN: usize = 2;
pub const DATA_POSITION: usize = 0;
pub const FOOTER_POSITION: usize = 1;

// Command footer
pub const COMMAND_FOOTER: u8 = 0x01;

// Response footers
pub const ERROR_FOOTER: u8 = 0x00;
pub const CONFIRMATION_FOOTER: u8 = 0x01;

// Data values, shared by commands and responses
pub const LED_ERROR: u8 = 0x00;
pub const LED_ON: u8 = 0x01;
pub const LED_OFF: u8 = 0x02;

/// Raw bytes of one frame
pub type Frame = [u8; FRAME_LEN];

/// Why a frame could not be decoded
///
/// None of these are fatal. Callers drop the frame and carry on.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    #[error("malformed frame: expected 2 bytes, got {0}")]
    MalformedFrame(usize),
    #[error("unknown footer 0x{0:02x}")]
    UnknownFooter(u8),
    #[error("unknown command value 0x{0:02x}")]
    UnknownCommand(u8),
}

fn split(data: &[u8]) -> Result<(u8, u8), DecodeError> {
    if data.len() != FRAME_LEN {
        return Err(DecodeError::MalformedFrame(data.len()));
    }
    Ok((data[DATA_POSITION], data[FOOTER_POSITION]))
}

fn led_from_data(data: u8) -> Result<bool, DecodeError> {
    match data {
        LED_ON => Ok(true),
        LED_OFF => Ok(false),
        other => Err(DecodeError::UnknownCommand(other)),
    }
}

fn led_data(led_on: bool) -> u8 {
    if led_on { LED_ON } else { LED_OFF }
}

/// Command sent by the controller: switch the LED on or off
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandFrame {
    pub led_on: bool,
}

impl CommandFrame {
    pub fn new(led_on: bool) -> Self {
        Self { led_on }
    }

    /// The data byte, `LED_ON` or `LED_OFF`
    pub fn data(&self) -> u8 {
        led_data(self.led_on)
    }

    pub fn footer(&self) -> u8 {
        COMMAND_FOOTER
    }

    pub fn to_bytes(&self) -> Frame {
        let mut frame = [0u8; FRAME_LEN];
        frame[DATA_POSITION] = self.data();
        frame[FOOTER_POSITION] = COMMAND_FOOTER;
        frame
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, DecodeError> {
        let (value, footer) = split(data)?;
        if footer != COMMAND_FOOTER {
            return Err(DecodeError::UnknownFooter(footer));
        }
        Ok(Self { led_on: led_from_data(value)? })
    }
}

/// Response sent back by the responder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFrame {
    /// The command was carried out, the LED is now in this state
    Confirmation { led_on: bool },
    /// The responder could not carry out the command
    Error,
}

impl ResponseFrame {
    pub fn confirmation(led_on: bool) -> Self {
        Self::Confirmation { led_on }
    }

    pub fn data(&self) -> u8 {
        match self {
            Self::Confirmation { led_on } => led_data(*led_on),
            Self::Error => LED_ERROR,
        }
    }

    pub fn footer(&self) -> u8 {
        match self {
            Self::Confirmation { .. } => CONFIRMATION_FOOTER,
            Self::Error => ERROR_FOOTER,
        }
    }

    pub fn to_bytes(&self) -> Frame {
        let mut frame = [0u8; FRAME_LEN];
        frame[DATA_POSITION] = self.data();
        frame[FOOTER_POSITION] = self.footer();
        frame
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, DecodeError> {
        let (value, footer) = split(data)?;
        match footer {
            CONFIRMATION_FOOTER => Ok(Self::Confirmation { led_on: led_from_data(value)? }),
            // error responses carry nothing we care about in the data byte
            ERROR_FOOTER => Ok(Self::Error),
            other => Err(DecodeError::UnknownFooter(other)),
        }
    }
}

impl From<Option<bool>> for ResponseFrame {
    fn from(confirmed: Option<bool>) -> Self {
        match confirmed {
            Some(led_on) => Self::Confirmation { led_on },
            None => Self::Error,
        }
    }
}

pub fn encode_command(led_on: bool) -> Frame {
    CommandFrame::new(led_on).to_bytes()
}

pub fn decode_command(data: &[u8]) -> Result<CommandFrame, DecodeError> {
    CommandFrame::from_bytes(data)
}

/// `Some(state)` encodes a confirmation, `None` an error response
pub fn encode_response(confirmed: Option<bool>) -> Frame {
    ResponseFrame::from(confirmed).to_bytes()
}

pub fn decode_response(data: &[u8]) -> Result<ResponseFrame, DecodeError> {
    ResponseFrame::from_bytes(data)
}
