//! Property-based tests for configuration module
//!
//! These tests use proptest to generate random configurations and verify
//! invariants, serialization round-trips, and edge case handling.

use super::*;
use proptest::prelude::*;

// Strategy for generating valid surface configurations
prop_compose! {
    fn valid_surface_config()(
        width in 1u32..7680,
        height in 1u32..4320,
        clear_color in prop::array::uniform4(0.0f64..=1.0),
        present_mode in prop_oneof![
            Just("auto".to_string()),
            Just("fifo".to_string()),
            Just("mailbox".to_string()),
            Just("immediate".to_string()),
        ],
        backend in prop_oneof![
            Just("auto".to_string()),
            Just("vulkan".to_string()),
            Just("gl".to_string()),
            Just("metal".to_string()),
            Just("dx12".to_string()),
        ],
        rederive_on_resize in any::<bool>(),
    ) -> SurfaceConfig {
        SurfaceConfig {
            width,
            height,
            title: "Mosaic".to_string(),
            clear_color,
            present_mode,
            backend,
            rederive_on_resize,
        }
    }
}

// Strategy for generating valid stream configurations
prop_compose! {
    fn valid_stream_config()(
        width in 1u32..4096,
        height in 1u32..4096,
        fps in 1.0f64..240.0,
        alpha in 0.0f32..=1.0,
        translate in prop::array::uniform2(-2.0f32..2.0),
        scale in prop::array::uniform2(0.1f32..4.0),
        pattern in prop_oneof![
            Just("bars".to_string()),
            Just("gradient".to_string()),
            Just("solid".to_string()),
        ],
        color in any::<[u8; 3]>(),
    ) -> StreamConfig {
        StreamConfig {
            width,
            height,
            fps,
            alpha,
            translate,
            scale,
            pattern,
            color: format!("#{:02x}{:02x}{:02x}", color[0], color[1], color[2]),
        }
    }
}

prop_compose! {
    fn valid_mosaic_config()(
        surface in valid_surface_config(),
        max_workers in 1usize..64,
        streams in prop::collection::vec(valid_stream_config(), 0..6),
        debug in any::<bool>(),
    ) -> MosaicConfig {
        MosaicConfig {
            general: GeneralConfig { debug, ..GeneralConfig::default() },
            surface,
            decode: DecodeConfig { max_workers },
            streams,
        }
    }
}

proptest! {
    #[test]
    fn test_valid_configs_validate(config in valid_mosaic_config()) {
        prop_assert!(config.validate().is_ok(), "{:?}", config.validate().err());
    }

    #[test]
    fn test_config_toml_roundtrip(config in valid_mosaic_config()) {
        let toml_string = toml::to_string(&config).unwrap();
        let parsed: MosaicConfig = toml::from_str(&toml_string).unwrap();

        prop_assert_eq!(&config.surface, &parsed.surface);
        prop_assert_eq!(config.decode.max_workers, parsed.decode.max_workers);
        prop_assert_eq!(config.streams.len(), parsed.streams.len());
        for (a, b) in config.streams.iter().zip(&parsed.streams) {
            prop_assert_eq!(a.size(), b.size());
            prop_assert!((a.alpha - b.alpha).abs() < 1e-6);
            prop_assert_eq!(a.pattern().unwrap(), b.pattern().unwrap());
        }
    }

    #[test]
    fn test_solid_color_parses(color in any::<[u8; 3]>()) {
        let hex = format!("#{:02X}{:02X}{:02X}", color[0], color[1], color[2]);
        prop_assert_eq!(parse_hex_color(&hex).unwrap(), color);
    }

    #[test]
    fn test_out_of_range_alpha_rejected(
        mut config in valid_mosaic_config(),
        alpha in prop_oneof![-10.0f32..-0.001, 1.001f32..10.0],
    ) {
        prop_assume!(!config.streams.is_empty());
        config.streams[0].alpha = alpha;
        prop_assert!(config.validate().is_err());
    }

    #[test]
    fn test_out_of_range_clear_color_rejected(
        mut config in valid_mosaic_config(),
        channel in 0usize..4,
        value in prop_oneof![-5.0f64..-0.001, 1.001f64..5.0],
    ) {
        config.surface.clear_color[channel] = value;
        prop_assert!(config.validate().is_err());
    }

    #[test]
    fn test_merge_takes_changed_sections(
        surface in valid_surface_config(),
        max_workers in 1usize..64,
    ) {
        let mut partial = MosaicConfig::default();
        partial.surface = surface.clone();
        partial.decode.max_workers = max_workers;

        let merged = MosaicConfig::default().merge_partial(partial);
        prop_assert_eq!(merged.surface, surface);
        prop_assert_eq!(merged.decode.max_workers, max_workers);
        prop_assert_eq!(merged.streams, MosaicConfig::default().streams);
    }
}
