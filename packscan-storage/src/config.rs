//! Scanner configuration.

use crate::decode::DecodeStrategy;
use crate::error::{Error, Result};
use crate::scan::ScanStrategy;
use crate::scanner::Scanner;
use crate::shared::{BitmapLayout, SharedScanStrategy};
use crate::simd::SimdLevel;
use serde::{Deserialize, Serialize};

/// Strategies used by a [`Scanner`].
///
/// Missing fields default to the fastest strategies supported by the
/// current CPU.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    decode: DecodeStrategy,
    scan: ScanStrategy,
    layout: BitmapLayout,
    // table fields go last in toml.
    shared: SharedScanStrategy,
}

impl Default for ScanConfig {
    #[inline]
    fn default() -> Self {
        ScanConfig::for_level(SimdLevel::detect())
    }
}

impl ScanConfig {
    /// Fastest strategies of given level.
    #[inline]
    pub fn for_level(level: SimdLevel) -> Self {
        ScanConfig {
            decode: DecodeStrategy::best(level),
            scan: ScanStrategy::best(level),
            layout: BitmapLayout::default(),
            shared: SharedScanStrategy::best(level),
        }
    }

    #[inline]
    pub fn decode(mut self, decode: DecodeStrategy) -> Self {
        self.decode = decode;
        self
    }

    #[inline]
    pub fn scan(mut self, scan: ScanStrategy) -> Self {
        self.scan = scan;
        self
    }

    #[inline]
    pub fn shared(mut self, shared: SharedScanStrategy) -> Self {
        self.shared = shared;
        self
    }

    #[inline]
    pub fn layout(mut self, layout: BitmapLayout) -> Self {
        self.layout = layout;
        self
    }

    #[inline]
    pub fn from_toml(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    #[inline]
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string(self)?)
    }

    /// Validate strategies against current CPU and create a scanner.
    pub fn build(self) -> Result<Scanner> {
        let level = SimdLevel::detect();
        let required = [
            (self.decode.name(), self.decode.required_level()),
            (self.scan.name(), self.scan.required_level()),
            (self.shared.name(), self.shared.required_level()),
        ];
        for (name, req) in required {
            if !level.supports(req) {
                return Err(Error::InvalidConfig(format!(
                    "strategy {} requires {}, cpu supports {}",
                    name, req, level
                )));
            }
        }
        if !self.shared.supports_layout(self.layout) {
            return Err(Error::InvalidConfig(format!(
                "strategy {} does not support layout {:?}",
                self.shared, self.layout
            )));
        }
        if let SharedScanStrategy::Threaded { threads: 0, .. } = self.shared {
            return Err(Error::InvalidConfig("thread number must be positive".to_string()));
        }
        log::info!(
            "scanner: simd={}, decode={}, scan={}, shared={}, layout={:?}",
            level,
            self.decode,
            self.scan,
            self.shared,
            self.layout
        );
        Ok(Scanner::new(self.decode, self.scan, self.shared, self.layout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_config_default() {
        let config = ScanConfig::default();
        println!("{:?}", config);
        let config_str = config.to_toml().unwrap();
        println!("{}", config_str);
        let parsed = ScanConfig::from_toml(&config_str).unwrap();
        assert_eq!(parsed, config);
        assert!(config.build().is_ok());
    }

    #[test]
    fn test_scan_config_from_toml() {
        let config = ScanConfig::from_toml(
            r#"
            decode = "scalar"
            layout = "interleaved"

            [shared]
            kind = "sequential"
            scan = "scalar"
            "#,
        )
        .unwrap();
        assert_eq!(config.decode, DecodeStrategy::Scalar);
        assert_eq!(config.layout, BitmapLayout::Interleaved);
        assert_eq!(
            config.shared,
            SharedScanStrategy::Sequential {
                scan: ScanStrategy::Scalar
            }
        );
        // missing scan falls back to default.
        assert_eq!(config.scan, ScanStrategy::best(SimdLevel::detect()));

        assert!(ScanConfig::from_toml("decode = \"sse512\"").is_err());
    }

    #[test]
    fn test_scan_config_validate() {
        let threaded = SharedScanStrategy::Threaded {
            threads: 2,
            scan: ScanStrategy::Scalar,
        };
        let config = ScanConfig::for_level(SimdLevel::Scalar)
            .shared(threaded)
            .layout(BitmapLayout::Interleaved);
        assert!(matches!(config.build(), Err(Error::InvalidConfig(_))));

        let config = ScanConfig::for_level(SimdLevel::Scalar).shared(SharedScanStrategy::Threaded {
            threads: 0,
            scan: ScanStrategy::Scalar,
        });
        assert!(config.build().is_err());

        let config = ScanConfig::for_level(SimdLevel::Scalar).decode(DecodeStrategy::Avx2Shift);
        assert_eq!(config.build().is_ok(), DecodeStrategy::Avx2Shift.is_supported());
    }
}
