//! End-to-end network generation: YAML + DCF files in, .bin scripts out

use candcf_core::diag::Diagnostics;
use candcf_core::sdo::read_bin;
use candcf_gen::{generate_network, NetworkConfig};

use std::io::Write as _;

const SLAVE_DCF: &str = "\
[DeviceComissioning]
NodeID=2

[MandatoryObjects]
SupportedObjects=2
1=0x1000
2=0x1018

[OptionalObjects]
SupportedObjects=2
1=0x1016
2=0x1017

[1000]
ParameterName=Device type
DataType=0x0007
AccessType=ro
DefaultValue=0x00000000

[1016]
ParameterName=Consumer heartbeat time
ObjectType=0x08
SubNumber=2

[1016sub0]
ParameterName=Highest sub-index supported
DataType=0x0005
AccessType=const
DefaultValue=1

[1016sub1]
ParameterName=Consumer heartbeat time 1
DataType=0x0007
AccessType=rw
DefaultValue=0

[1017]
ParameterName=Producer heartbeat time
DataType=0x0006
AccessType=rw
DefaultValue=0

[1018]
ParameterName=Identity object
ObjectType=0x09
SubNumber=2

[1018sub0]
ParameterName=Highest sub-index supported
DataType=0x0005
AccessType=const
DefaultValue=4

[1018sub1]
ParameterName=Vendor-ID
DataType=0x0007
AccessType=ro
DefaultValue=0x360
";

#[test]
fn test_generate_network_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let dcf_path = dir.path().join("drive.eds");
    std::fs::File::create(&dcf_path)
        .unwrap()
        .write_all(SLAVE_DCF.as_bytes())
        .unwrap();

    let yaml = format!(
        "\
master:
  node_id: 1
  heartbeat_producer: 100

drive:
  dcf: {}
  heartbeat_consumer: true
  heartbeat_producer: 500
",
        dcf_path.display()
    );
    let config = NetworkConfig::load_from_str(&yaml).unwrap();

    let mut diag = Diagnostics::new();
    let (master, slaves) = generate_network(&config, &mut diag, true).unwrap();
    assert!(diag.is_empty(), "{:?}", diag.warnings());

    let drive = &slaves["drive"];
    assert_eq!(drive.device.node_id, 2);

    drive.write_bin(dir.path()).unwrap();
    let bytes = std::fs::read(dir.path().join("drive.bin")).unwrap();
    let records = read_bin(&mut bytes.as_slice()).unwrap();

    // The heartbeat consumer entry is prepended to the script, ahead of the
    // producer write from the slave's own overlay
    assert_eq!(records.len(), 2);
    assert_eq!((records[0].index, records[0].sub_index), (0x1016, 1));
    // Master at 100 ms, default multiplier 3.0
    assert_eq!(records[0].data, ((1u32 << 16) | 300).to_le_bytes().to_vec());
    assert_eq!((records[1].index, records[1].sub_index), (0x1017, 0));
    assert_eq!(records[1].data, 500u16.to_le_bytes().to_vec());

    // No master-level writes for this network
    assert!(master.sdo.is_empty());
    master.write_bin(dir.path()).unwrap();
    assert!(!dir.path().join("master.bin").exists());
}

#[test]
fn test_unconfigured_slave_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let dcf_path = dir.path().join("drive.eds");
    // No NodeID in the commissioning section
    let dcf = SLAVE_DCF.replace("[DeviceComissioning]\nNodeID=2\n\n", "");
    std::fs::File::create(&dcf_path)
        .unwrap()
        .write_all(dcf.as_bytes())
        .unwrap();

    let yaml = format!("master: {{node_id: 1}}\ndrive: {{dcf: {}}}\n", dcf_path.display());
    let config = NetworkConfig::load_from_str(&yaml).unwrap();

    let mut diag = Diagnostics::new();
    let (_, slaves) = generate_network(&config, &mut diag, true).unwrap();
    assert!(slaves.is_empty());
    assert!(diag.any_contains("drive: ignoring slave with unconfigured node-ID"));
}
