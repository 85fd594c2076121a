//! Real symbols through both engines, the still decoder and a live session

mod common;

use std::time::Duration;

use barscan::camera::{CameraSession, ScreenGeometry};
use barscan::decode::{
    DecodeDispatcher, DecodeEngine, DecodeFormats, DecodeModePolicy, EngineKind, FallbackEngine,
    FrameOutcome, RxingEngine, ScanHints, StaticImageDecoder, Symbology,
};
use barscan::luminance::LuminanceView;
use barscan::{Config, Orientation, Rect, Resolution};

use common::{centred_on_canvas, gray_frame, render_code128, render_qr, FakeCamera};

const PAYLOAD: &str = "https://example.com/barscan";
const LINEAR_PAYLOAD: &str = "BARSCAN-128";

#[test]
fn test_fallback_reads_rendered_qr() {
    let symbol = render_qr(PAYLOAD, 4);
    let mut engine = FallbackEngine::new(&ScanHints::default());

    let payload = engine
        .decode(&LuminanceView::full(&symbol))
        .unwrap()
        .expect("fallback should find the symbol");

    assert_eq!(payload.text, PAYLOAD);
    assert_eq!(payload.symbology, Symbology::QrCode);
    assert_eq!(payload.points.len(), 4);
}

#[test]
fn test_fallback_slot_reads_linear_symbol() {
    let canvas = Resolution::new(640, 480);
    let frame = gray_frame(centred_on_canvas(&render_code128(LINEAR_PAYLOAD, 3, 120), canvas));
    let mut dispatcher = DecodeDispatcher::new(&Config::default().decode);
    let geometry = barscan::pipeline::ScanGeometry {
        crop: Rect::bounds(canvas.width, canvas.height),
        rotate_upright: false,
        mirror: false,
    };

    let outcome = dispatcher.dispatch(&frame, Some(&geometry), DecodeModePolicy::ZbarOnly);
    let result = outcome.decoded().expect("linear symbol through the fallback slot");
    assert_eq!(result.engine, EngineKind::Zbar);
    assert_eq!(result.payload.text, LINEAR_PAYLOAD);
    assert_eq!(result.payload.symbology, Symbology::Code128);
}

#[test]
fn test_fallback_ignores_disabled_linear_formats() {
    let symbol = render_code128(LINEAR_PAYLOAD, 3, 120);
    let mut engine = FallbackEngine::new(&ScanHints {
        formats: DecodeFormats {
            industrial_1d: false,
            ..Default::default()
        },
        character_set: None,
    });

    assert_eq!(engine.decode(&LuminanceView::full(&symbol)).unwrap(), None);
}

#[test]
fn test_rxing_reads_rendered_qr() {
    let symbol = render_qr(PAYLOAD, 4);
    let mut engine = RxingEngine::new(&ScanHints::default());

    let payload = engine
        .decode(&LuminanceView::full(&symbol))
        .unwrap()
        .expect("rxing should find the symbol");
    engine.reset();

    assert_eq!(payload.text, PAYLOAD);
    assert_eq!(payload.symbology, Symbology::QrCode);
}

#[test]
fn test_dispatcher_decodes_inside_crop_only() {
    let canvas = Resolution::new(320, 240);
    let frame = gray_frame(centred_on_canvas(&render_qr(PAYLOAD, 3), canvas));
    let mut dispatcher = DecodeDispatcher::new(&Config::default().decode);

    let geometry = barscan::pipeline::ScanGeometry {
        crop: Rect::new(0, 0, 320, 240),
        rotate_upright: false,
        mirror: false,
    };
    let outcome = dispatcher.dispatch(&frame, Some(&geometry), DecodeModePolicy::DualRace);
    let result = outcome.decoded().expect("symbol inside crop");
    assert_eq!(result.payload.text, PAYLOAD);
    assert_eq!(result.engine, EngineKind::Zxing);

    // A corner strip that misses the symbol entirely
    let corner = barscan::pipeline::ScanGeometry {
        crop: Rect::new(0, 0, 40, 40),
        ..geometry
    };
    assert_eq!(
        dispatcher.dispatch(&frame, Some(&corner), DecodeModePolicy::DualRace),
        FrameOutcome::NoCodeFound
    );
}

#[test]
fn test_still_decoder_reads_image_file_formats() {
    let symbol = render_qr(PAYLOAD, 4);
    let image = image::DynamicImage::ImageLuma8(
        image::GrayImage::from_raw(symbol.width(), symbol.height(), symbol.data().to_vec())
            .unwrap(),
    );
    let mut decoder = StaticImageDecoder::new(&ScanHints::default());

    let result = decoder.decode(&image).unwrap().expect("still image decode");

    assert_eq!(result.payload.text, PAYLOAD);
    assert_eq!(
        result.source_region,
        Some(Rect::bounds(symbol.width(), symbol.height()))
    );
}

#[test]
fn test_live_session_decodes_real_symbol() {
    let canvas = Resolution::new(640, 480);
    let frame = gray_frame(centred_on_canvas(&render_qr(PAYLOAD, 4), canvas));
    let mut config = Config::default();
    config.decode.diagnostics = true;

    let mut session = CameraSession::new(&config);
    session
        .open(
            FakeCamera::vga().with_frame(frame),
            ScreenGeometry::new(Resolution::new(800, 600), Orientation::Deg0),
        )
        .unwrap();
    session.configure().unwrap();
    session.start_preview().unwrap();
    let outcomes = session
        .start_decoding(DecodeDispatcher::new(&config.decode))
        .unwrap();

    assert!(session.pump_frame(Duration::from_secs(5)).unwrap());
    let outcome = outcomes.recv_timeout(Duration::from_secs(10)).unwrap();
    let result = outcome.decoded().expect("symbol in the scan window");

    assert_eq!(result.payload.text, PAYLOAD);
    assert_eq!(result.source_region, Some(Rect::new(120, 89, 520, 389)));
    let thumbnail = result.thumbnail.as_ref().expect("diagnostics thumbnail");
    assert_eq!((thumbnail.width, thumbnail.height), (200, 150));
    assert!(!thumbnail.jpeg.is_empty());

    session.close();
}
