//! Preprocessing throughput

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use image::{DynamicImage, ImageFormat, RgbImage};
use inference_engine::ImagePreprocessor;
use std::io::Cursor;

fn encoded(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| image::Rgb([x as u8, y as u8, 128]));
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img).write_to(&mut buf, format).unwrap();
    buf.into_inner()
}

fn bench_preprocess(c: &mut Criterion) {
    let preprocessor = ImagePreprocessor::default();
    let jpeg = encoded(1920, 1080, ImageFormat::Jpeg);
    let png = encoded(512, 512, ImageFormat::Png);

    c.bench_function("preprocess_jpeg_1080p", |b| {
        b.iter(|| preprocessor.preprocess(black_box(&jpeg)).unwrap())
    });
    c.bench_function("preprocess_png_512", |b| {
        b.iter(|| preprocessor.preprocess(black_box(&png)).unwrap())
    });
}

criterion_group!(benches, bench_preprocess);
criterion_main!(benches);
