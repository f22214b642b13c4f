use crate::error::Result;
use crate::stage::{
    DecodeLayer, Direction, Downstream, EncodeLayer, ReadStage, StageFactory, StageId,
    StageOptions, Upstream, WriteStage,
};
use std::io::{self, Write};

const BROTLI_BUFFER_SIZE: usize = 4096;
const BROTLI_LGWIN: u32 = 22;

/// gzip via `flate2`; concatenated members are read as one stream
#[derive(Debug, Clone, Copy, Default)]
pub struct GzipStage;

impl StageFactory for GzipStage {
    fn id(&self) -> StageId {
        StageId::GZIP
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["gz", "gzip"]
    }

    fn validate(&self, _direction: Direction, options: &StageOptions) -> Result<()> {
        options.reject_unknown(&StageId::GZIP, &["level"])?;
        options.level(&StageId::GZIP, "level", 0..=9, 6)?;
        Ok(())
    }

    fn reader(&self, upstream: Upstream, _options: &StageOptions) -> Result<Box<dyn ReadStage>> {
        let decoder = flate2::read::MultiGzDecoder::new(upstream.into_stream()?);
        Ok(Box::new(DecodeLayer::new(
            StageId::GZIP,
            decoder,
            flate2::read::MultiGzDecoder::into_inner,
        )))
    }

    fn writer(
        &self,
        downstream: Downstream,
        options: &StageOptions,
    ) -> Result<Box<dyn WriteStage>> {
        let level = options.level(&StageId::GZIP, "level", 0..=9, 6)?;
        let encoder = flate2::write::GzEncoder::new(
            downstream.into_stream()?,
            flate2::Compression::new(level),
        );
        Ok(Box::new(EncodeLayer::new(
            StageId::GZIP,
            encoder,
            flate2::write::GzEncoder::finish,
        )))
    }
}

/// Zstandard frames via `zstd`
#[derive(Debug, Clone, Copy, Default)]
pub struct ZstdStage;

impl StageFactory for ZstdStage {
    fn id(&self) -> StageId {
        StageId::ZSTD
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["zst", "zstd"]
    }

    fn validate(&self, _direction: Direction, options: &StageOptions) -> Result<()> {
        options.reject_unknown(&StageId::ZSTD, &["level"])?;
        options.level(&StageId::ZSTD, "level", 1..=22, 3)?;
        Ok(())
    }

    fn reader(&self, upstream: Upstream, _options: &StageOptions) -> Result<Box<dyn ReadStage>> {
        let decoder = zstd::stream::read::Decoder::new(upstream.into_stream()?)?;
        Ok(Box::new(DecodeLayer::new(StageId::ZSTD, decoder, |d| {
            d.finish().into_inner()
        })))
    }

    fn writer(
        &self,
        downstream: Downstream,
        options: &StageOptions,
    ) -> Result<Box<dyn WriteStage>> {
        let level = options.level(&StageId::ZSTD, "level", 1..=22, 3)?;
        let encoder = zstd::stream::write::Encoder::new(downstream.into_stream()?, level as i32)?;
        Ok(Box::new(EncodeLayer::new(StageId::ZSTD, encoder, |e| {
            e.finish()
        })))
    }
}

/// LZ4 frame format via `lz4_flex`
#[derive(Debug, Clone, Copy, Default)]
pub struct Lz4Stage;

impl StageFactory for Lz4Stage {
    fn id(&self) -> StageId {
        StageId::LZ4
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["lz4"]
    }

    fn validate(&self, _direction: Direction, options: &StageOptions) -> Result<()> {
        options.reject_unknown(&StageId::LZ4, &[])
    }

    fn reader(&self, upstream: Upstream, _options: &StageOptions) -> Result<Box<dyn ReadStage>> {
        let decoder = lz4_flex::frame::FrameDecoder::new(upstream.into_stream()?);
        Ok(Box::new(DecodeLayer::new(
            StageId::LZ4,
            decoder,
            lz4_flex::frame::FrameDecoder::into_inner,
        )))
    }

    fn writer(
        &self,
        downstream: Downstream,
        _options: &StageOptions,
    ) -> Result<Box<dyn WriteStage>> {
        let encoder = lz4_flex::frame::FrameEncoder::new(downstream.into_stream()?);
        Ok(Box::new(EncodeLayer::new(StageId::LZ4, encoder, |e| {
            e.finish()
                .map_err(|err| io::Error::new(io::ErrorKind::Other, err))
        })))
    }
}

/// Brotli via `brotli`
#[derive(Debug, Clone, Copy, Default)]
pub struct BrotliStage;

impl StageFactory for BrotliStage {
    fn id(&self) -> StageId {
        StageId::BROTLI
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["br"]
    }

    fn validate(&self, _direction: Direction, options: &StageOptions) -> Result<()> {
        options.reject_unknown(&StageId::BROTLI, &["quality"])?;
        options.level(&StageId::BROTLI, "quality", 0..=11, 4)?;
        Ok(())
    }

    fn reader(&self, upstream: Upstream, _options: &StageOptions) -> Result<Box<dyn ReadStage>> {
        let decoder = brotli::Decompressor::new(upstream.into_stream()?, BROTLI_BUFFER_SIZE);
        Ok(Box::new(DecodeLayer::new(
            StageId::BROTLI,
            decoder,
            brotli::Decompressor::into_inner,
        )))
    }

    fn writer(
        &self,
        downstream: Downstream,
        options: &StageOptions,
    ) -> Result<Box<dyn WriteStage>> {
        let quality = options.level(&StageId::BROTLI, "quality", 0..=11, 4)?;
        let encoder = brotli::CompressorWriter::new(
            downstream.into_stream()?,
            BROTLI_BUFFER_SIZE,
            quality,
            BROTLI_LGWIN,
        );
        // into_inner swallows errors from the final block, flush surfaces them first
        Ok(Box::new(EncodeLayer::new(StageId::BROTLI, encoder, |mut e| {
            e.flush()?;
            Ok(e.into_inner())
        })))
    }
}
