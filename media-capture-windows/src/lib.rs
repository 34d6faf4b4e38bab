//! # media-capture-windows
//!
//! Windows backend for media-capture.
//!
//! Provides:
//! - `DxgiOutputFactory` / `DxgiDisplayDevice`: desktop duplication of one monitor via DXGI
//! - `WasapiCapture`: endpoint capture via WASAPI, loopback for render endpoints
//! - `WindowsDeviceEnumerator`: monitors (DXGI) and audio endpoints (MMDevice API)
//!
//! ## Platform Requirements
//! - Windows 8+ for DXGI desktop duplication
//! - Visual Studio Build Tools 2022 + Windows SDK for linking
//!
//! ## Usage
//! ```ignore
//! use media_capture_core::{CancellationToken, Pipeline, RecorderConfig};
//! use media_capture_windows::{DxgiOutputFactory, WasapiCapture};
//!
//! let config = RecorderConfig::default();
//! let display = DxgiOutputFactory::for_index(config.monitor_index)?;
//! let audio = WasapiCapture::default_loopback()?;
//! let pipeline = Pipeline::from_config(display, audio, &config)?;
//! pipeline.start(&CancellationToken::new())?;
//! ```

#[cfg(target_os = "windows")]
mod com;
#[cfg(target_os = "windows")]
pub mod device_enumerator;
#[cfg(target_os = "windows")]
pub mod dxgi_duplication;
#[cfg(target_os = "windows")]
pub mod monitor_enumerator;
#[cfg(target_os = "windows")]
pub mod wasapi_capture;

#[cfg(target_os = "windows")]
pub use device_enumerator::WindowsDeviceEnumerator;
#[cfg(target_os = "windows")]
pub use dxgi_duplication::{DxgiDisplayDevice, DxgiOutputFactory};
#[cfg(target_os = "windows")]
pub use wasapi_capture::WasapiCapture;
