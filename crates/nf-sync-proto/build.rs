use std::error::Error;
use std::path::Path;

fn main() -> Result<(), Box<dyn Error>> {
    let proto_root = Path::new("proto");
    let proto_path = proto_root.join("sdcoreConfig/config.proto");

    println!("cargo:rerun-if-changed={}", proto_path.display());

    let mut config = tonic_build::configure()
        .build_server(false)
        .type_attribute(".", "#[derive(::serde::Serialize, ::serde::Deserialize)]");

    // Distributor dumps omit empty fields; every message must still parse.
    for message in [
        "NetworkSliceRequest",
        "NetworkSliceResponse",
        "NetworkSlice",
        "Nssai",
        "DeviceGroup",
        "IpDomain",
        "SiteInfo",
        "GNodeB",
        "UpfInfo",
        "PlmnId",
    ] {
        config = config.type_attribute(format!(".sdcoreConfig.{}", message), "#[serde(default)]");
    }

    config.compile_protos(&[proto_path], &[proto_root])?;

    Ok(())
}
