//! Scripted camera and engines shared by the integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use barscan::camera::{CameraCapabilities, CameraDevice, CameraParameters};
use barscan::capture::{PixelFormat, RawFrame};
use barscan::decode::{DecodeEngine, DecodedPayload, EngineKind, ScanHints, Symbology};
use barscan::luminance::LuminanceView;
use barscan::transform::LumaBuffer;
use barscan::{DeviceError, EngineError, Orientation, Resolution};
use qrcode::{Color, QrCode};
use rxing::{BarcodeFormat, MultiFormatWriter, Writer};

/// What the fake camera saw, readable after the session took ownership
#[derive(Debug, Default)]
pub struct CameraLog {
    pub set_calls: Vec<CameraParameters>,
    pub frames_requested: usize,
    pub preview_running: bool,
    pub released: bool,
}

pub struct FakeCamera {
    pub capabilities: Option<CameraCapabilities>,
    pub parameters: CameraParameters,
    /// 1-based `set_parameters` calls to refuse
    pub reject_calls: Vec<usize>,
    pub frame: RawFrame,
    pub log: Arc<Mutex<CameraLog>>,
}

impl FakeCamera {
    pub fn new(capabilities: CameraCapabilities) -> Self {
        let size = capabilities
            .preview_sizes
            .first()
            .copied()
            .unwrap_or(Resolution::new(640, 480));
        Self {
            capabilities: Some(capabilities),
            parameters: CameraParameters::default(),
            reject_calls: Vec::new(),
            frame: blank_frame(size),
            log: Arc::default(),
        }
    }

    /// Back camera mounted at 90° offering VGA only
    pub fn vga() -> Self {
        Self::new(CameraCapabilities {
            preview_sizes: vec![Resolution::new(640, 480)],
            picture_sizes: vec![Resolution::new(640, 480)],
            mount_orientation: Orientation::Deg90,
            ..Default::default()
        })
    }

    pub fn broken() -> Self {
        Self {
            capabilities: None,
            ..Self::vga()
        }
    }

    pub fn with_frame(mut self, frame: RawFrame) -> Self {
        self.frame = frame;
        self
    }

    pub fn rejecting(mut self, calls: &[usize]) -> Self {
        self.reject_calls = calls.to_vec();
        self
    }
}

impl CameraDevice for FakeCamera {
    fn capabilities(&self) -> Result<CameraCapabilities, DeviceError> {
        self.capabilities
            .clone()
            .ok_or_else(|| DeviceError::NotFound("/dev/fake".into()))
    }

    fn parameters(&self) -> Result<CameraParameters, DeviceError> {
        Ok(self.parameters.clone())
    }

    fn set_parameters(&mut self, parameters: &CameraParameters) -> Result<(), DeviceError> {
        let mut log = self.log.lock().unwrap();
        log.set_calls.push(parameters.clone());
        if self.reject_calls.contains(&log.set_calls.len()) {
            return Err(DeviceError::Rejected("scripted rejection".into()));
        }
        self.parameters = parameters.clone();
        Ok(())
    }

    fn start_preview(&mut self) -> Result<(), DeviceError> {
        self.log.lock().unwrap().preview_running = true;
        Ok(())
    }

    fn stop_preview(&mut self) -> Result<(), DeviceError> {
        self.log.lock().unwrap().preview_running = false;
        Ok(())
    }

    fn request_frame(&mut self) -> Result<RawFrame, DeviceError> {
        let mut log = self.log.lock().unwrap();
        if !log.preview_running {
            return Err(DeviceError::NotStreaming);
        }
        log.frames_requested += 1;
        Ok(self.frame.clone())
    }

    fn release(&mut self) {
        self.log.lock().unwrap().released = true;
    }
}

/// Engine that answers from a script and counts its calls
pub struct CountingEngine {
    pub kind: EngineKind,
    pub answer: Option<String>,
    pub calls: Arc<AtomicUsize>,
}

impl CountingEngine {
    pub fn new(kind: EngineKind, answer: Option<&str>) -> Self {
        Self {
            kind,
            answer: answer.map(str::to_string),
            calls: Arc::default(),
        }
    }

    pub fn counter(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

impl DecodeEngine for CountingEngine {
    fn kind(&self) -> EngineKind {
        self.kind
    }

    fn configure(&mut self, _hints: &ScanHints) {}

    fn decode(&mut self, _view: &LuminanceView<'_>) -> Result<Option<DecodedPayload>, EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.answer.clone().map(|text| DecodedPayload {
            text,
            symbology: Symbology::QrCode,
            points: Vec::new(),
        }))
    }

    fn reset(&mut self) {}
}

pub fn calls(counter: &Arc<AtomicUsize>) -> usize {
    counter.load(Ordering::SeqCst)
}

pub fn blank_frame(size: Resolution) -> RawFrame {
    RawFrame::new(
        vec![255u8; (size.width * size.height) as usize],
        size.width,
        size.height,
        PixelFormat::Gray8,
    )
}

/// Black-on-white QR symbol with a four-module quiet zone
pub fn render_qr(text: &str, module_px: u32) -> LumaBuffer {
    let code = QrCode::new(text.as_bytes()).unwrap();
    let modules = code.width() as u32;
    let colors = code.to_colors();
    let side = (modules + 8) * module_px;

    let mut data = vec![255u8; (side * side) as usize];
    for y in 0..side {
        for x in 0..side {
            let (mx, my) = ((x / module_px) as i64 - 4, (y / module_px) as i64 - 4);
            if mx < 0 || my < 0 || mx >= modules as i64 || my >= modules as i64 {
                continue;
            }
            if colors[(my as u32 * modules + mx as u32) as usize] == Color::Dark {
                data[(y * side + x) as usize] = 0;
            }
        }
    }
    LumaBuffer::new(data, side, side).unwrap()
}

/// Code 128 symbol, bars `bar_height` pixels tall with the writer's quiet zone
pub fn render_code128(text: &str, module_px: u32, bar_height: u32) -> LumaBuffer {
    let matrix = MultiFormatWriter::default()
        .encode(text, &BarcodeFormat::CODE_128, 0, 0)
        .unwrap();
    let width = matrix.width() * module_px;

    let mut data = Vec::with_capacity((width * bar_height) as usize);
    for _ in 0..bar_height {
        for x in 0..width {
            data.push(if matrix.get(x / module_px, 0) { 0 } else { 255 });
        }
    }
    LumaBuffer::new(data, width, bar_height).unwrap()
}

/// Paste `symbol` centred onto a white canvas
pub fn centred_on_canvas(symbol: &LumaBuffer, canvas: Resolution) -> LumaBuffer {
    let mut data = vec![255u8; (canvas.width * canvas.height) as usize];
    let left = (canvas.width - symbol.width()) / 2;
    let top = (canvas.height - symbol.height()) / 2;
    for y in 0..symbol.height() {
        for x in 0..symbol.width() {
            data[((top + y) * canvas.width + left + x) as usize] = symbol.pixel(x, y);
        }
    }
    LumaBuffer::new(data, canvas.width, canvas.height).unwrap()
}

pub fn gray_frame(buffer: LumaBuffer) -> RawFrame {
    let (width, height) = (buffer.width(), buffer.height());
    RawFrame::new(buffer.into_data(), width, height, PixelFormat::Gray8)
}
