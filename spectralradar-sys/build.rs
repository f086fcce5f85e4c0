use std::env;
use std::path::PathBuf;

fn main() {
    // Only run bindgen and linking logic if the `spectralradar-sdk` feature is
    // enabled. This allows the crate to compile without the SDK if the feature
    // is not active.
    #[cfg(feature = "spectralradar-sdk")]
    {
        println!("cargo:rerun-if-env-changed=SPECTRALRADAR_SDK_DIR");
        println!("cargo:rerun-if-changed=wrapper.h"); // For bindgen to re-run if wrapper changes

        let sdk_dir = env::var("SPECTRALRADAR_SDK_DIR").expect(
            "SPECTRALRADAR_SDK_DIR environment variable must be set when `spectralradar-sdk` feature is enabled.",
        );

        let sdk_include_path = PathBuf::from(&sdk_dir).join("include");

        // Allow SPECTRALRADAR_LIB_DIR to override the default lib path
        let sdk_lib_path = if let Ok(lib_dir) = env::var("SPECTRALRADAR_LIB_DIR") {
            PathBuf::from(lib_dir)
        } else {
            PathBuf::from(&sdk_dir).join("DLL")
        };

        if !sdk_include_path.exists() {
            panic!(
                "SpectralRadar SDK include path does not exist: {:?}",
                sdk_include_path
            );
        }
        // The lib path might not exist if libraries are installed globally,
        // but it's a common place. Warn rather than panic.
        if !sdk_lib_path.exists() {
            eprintln!(
                "Warning: SpectralRadar SDK lib path does not exist: {:?}",
                sdk_lib_path
            );
        }

        // Generate bindings. The SpectralRadar API has no common symbol prefix,
        // so the allowlist enumerates its verb families instead.
        let bindings = bindgen::Builder::default()
            .header("wrapper.h")
            .parse_callbacks(Box::new(bindgen::CargoCallbacks::new()))
            .clang_arg(format!("-I{}", sdk_include_path.display()))
            .allowlist_function("init.*|close.*|create.*|clear.*")
            .allowlist_function("get.*|set.*|copy.*|append.*|export.*")
            .allowlist_function("startMeasurement|stopMeasurement|executeProcessing")
            .allowlist_function("determineSurface|rotateScanPattern|expectedAcquisitionTime_s")
            // Opaque handle struct typedefs and the complex sample layout.
            .allowlist_type(".*Handle")
            .allowlist_type("ComplexFloat|BOOL")
            // Engine enums (acquisition types, processing flags, properties, ...).
            .allowlist_type("Acquisition.*|Processing.*|Probe.*|Device_.*|ScanPattern.*")
            .allowlist_type("RawData.*|Data.*|ComplexData.*|Direction")
            .default_enum_style(bindgen::EnumVariation::Rust {
                non_exhaustive: false,
            })
            .generate()
            .expect("Unable to generate bindings");

        // Write the bindings to the $OUT_DIR/bindings.rs file.
        let out_path = PathBuf::from(env::var("OUT_DIR").unwrap());
        bindings
            .write_to_file(out_path.join("bindings.rs"))
            .expect("Couldn't write bindings!");

        // Link to the SpectralRadar library
        println!("cargo:rustc-link-search=native={}", sdk_lib_path.display());

        #[cfg(target_os = "windows")]
        {
            println!("cargo:rustc-link-lib=SpectralRadar");
        }
        #[cfg(not(target_os = "windows"))]
        {
            // The vendor ships Windows binaries only; allow experimental
            // builds against a locally provided shim library.
            println!("cargo:rustc-link-lib=SpectralRadar");
        }
    }
    #[cfg(not(feature = "spectralradar-sdk"))]
    {
        // If the spectralradar-sdk feature is not enabled, create a dummy
        // bindings file to allow src/lib.rs to compile without SDK presence.
        let out_path = PathBuf::from(env::var("OUT_DIR").unwrap());
        std::fs::write(
            out_path.join("bindings.rs"),
            "// Dummy bindings when spectralradar-sdk feature is not enabled\n",
        )
        .expect("Couldn't write dummy bindings!");
    }
}
