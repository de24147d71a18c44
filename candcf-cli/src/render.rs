//! Text rendering of the static C device descriptor
//!
//! The descriptor content is fully described by [CDevice]; this module only
//! lays it out as C source. Anything smarter than string formatting belongs
//! in `candcf_gen::cdevice`.

use std::io::{self, Write};

use candcf_gen::cdevice::{CDevice, CSubObject};

fn escape(s: &str) -> String {
    s.chars()
        .flat_map(|c| match c {
            '"' => vec!['\\', '"'],
            '\\' => vec!['\\', '\\'],
            c => vec![c],
        })
        .collect()
}

/// Write the C source file defining the device descriptor `name`
pub fn write_device_source<W: Write>(
    out: &mut W,
    dev: &CDevice,
    name: &str,
    no_strings: bool,
    include_config: bool,
) -> io::Result<()> {
    writeln!(
        out,
        "/* Static CANopen device description generated by dcf2dev. Do not edit. */"
    )?;
    if include_config {
        writeln!(out)?;
        writeln!(out, "#include <config.h>")?;
    }
    writeln!(out)?;
    writeln!(out, "#include <co/dev.h>")?;
    writeln!(out, "#include <co/obj.h>")?;
    writeln!(out)?;

    writeln!(out, "const co_dev_descriptor_t {} = {{", name)?;
    if !no_strings {
        writeln!(out, "\t.name = \"{}\",", escape(&dev.name))?;
        writeln!(out, "\t.vendor_name = \"{}\",", escape(&dev.vendor_name))?;
        writeln!(out, "\t.product_name = \"{}\",", escape(&dev.product_name))?;
        writeln!(out, "\t.order_code = \"{}\",", escape(&dev.order_code))?;
    }
    writeln!(out, "\t.baud = {},", dev.baud)?;
    writeln!(out, "\t.rate = {},", dev.rate)?;
    writeln!(out, "\t.lss = {},", dev.lss as u8)?;
    writeln!(out, "\t.dummy = 0x{:08X},", dev.dummy)?;
    writeln!(out, "\t.nobj = {},", dev.objects.len())?;
    writeln!(out, "\t.objects = {{")?;
    for object in &dev.objects {
        if no_strings {
            writeln!(out, "\t\t{{")?;
        } else {
            writeln!(out, "\t\t{{ /* 0x{:04X}: {} */", object.index, object.name)?;
        }
        writeln!(out, "\t\t\t.index = 0x{:04X},", object.index)?;
        writeln!(out, "\t\t\t.code = {},", object.code)?;
        writeln!(out, "\t\t\t.nsub = {},", object.subs.len())?;
        writeln!(out, "\t\t\t.subs = {{")?;
        for sub in &object.subs {
            write_sub_object(out, sub, no_strings)?;
        }
        writeln!(out, "\t\t\t}},")?;
        writeln!(out, "\t\t}},")?;
    }
    writeln!(out, "\t}},")?;
    writeln!(out, "}};")?;
    Ok(())
}

fn write_sub_object<W: Write>(
    out: &mut W,
    sub: &CSubObject,
    no_strings: bool,
) -> io::Result<()> {
    if no_strings {
        writeln!(out, "\t\t\t\t{{")?;
    } else {
        writeln!(out, "\t\t\t\t{{ /* {}: {} */", sub.sub_index, sub.name)?;
    }
    writeln!(out, "\t\t\t\t\t.subidx = {},", sub.sub_index)?;
    writeln!(out, "\t\t\t\t\t.type = {},", sub.type_name)?;
    writeln!(out, "\t\t\t\t\t.access = {},", sub.access)?;
    writeln!(out, "\t\t\t\t\t.flags = {},", sub.flags)?;
    writeln!(out, "\t\t\t\t\t.min = {{ .{} = {} }},", sub.member, sub.low_limit)?;
    writeln!(out, "\t\t\t\t\t.max = {{ .{} = {} }},", sub.member, sub.high_limit)?;
    writeln!(
        out,
        "\t\t\t\t\t.def = {{ .{} = {} }},",
        sub.member, sub.default_value
    )?;
    writeln!(out, "\t\t\t\t\t.val = {{ .{} = {} }},", sub.member, sub.value)?;
    writeln!(out, "\t\t\t\t}},")?;
    Ok(())
}

/// Write the header declaring the device descriptor `name`
pub fn write_device_header<W: Write>(out: &mut W, name: &str) -> io::Result<()> {
    let guard: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    writeln!(
        out,
        "/* Static CANopen device description generated by dcf2dev. Do not edit. */"
    )?;
    writeln!(out)?;
    writeln!(out, "#ifndef {}_H_", guard)?;
    writeln!(out, "#define {}_H_", guard)?;
    writeln!(out)?;
    writeln!(out, "#include <co/dev.h>")?;
    writeln!(out)?;
    writeln!(out, "#ifdef __cplusplus")?;
    writeln!(out, "extern \"C\" {{")?;
    writeln!(out, "#endif")?;
    writeln!(out)?;
    writeln!(out, "extern const co_dev_descriptor_t {};", name)?;
    writeln!(out)?;
    writeln!(out, "#ifdef __cplusplus")?;
    writeln!(out, "}}")?;
    writeln!(out, "#endif")?;
    writeln!(out)?;
    writeln!(out, "#endif /* {}_H_ */", guard)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assertables::assert_contains;
    use candcf_core::device::Device;
    use candcf_core::diag::Diagnostics;
    use candcf_core::value::Env;

    const DCF: &str = "\
[DeviceComissioning]
NodeName=dev

[MandatoryObjects]
SupportedObjects=2
1=0x1000
2=0x1018

[1000]
ParameterName=Device type
DataType=0x0007
AccessType=ro
DefaultValue=0x00000191

[1018]
ParameterName=Identity object
ObjectType=0x09
SubNumber=2

[1018sub0]
ParameterName=Highest sub-index supported
DataType=0x0005
AccessType=const
DefaultValue=1

[1018sub1]
ParameterName=Vendor-ID
DataType=0x0007
AccessType=ro
DefaultValue=0x360
";

    fn render(no_strings: bool, include_config: bool) -> String {
        let mut diag = Diagnostics::new();
        let env = Env::from([("NODEID".to_string(), 255)]);
        let dev = Device::from_dcf_str(DCF, env, &mut diag, true).unwrap();
        let cdev = CDevice::from_device(&dev).unwrap();
        let mut out = Vec::new();
        write_device_source(&mut out, &cdev, "test_dev", no_strings, include_config).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_source_layout() {
        let source = render(false, false);
        assert_contains!(source, "const co_dev_descriptor_t test_dev = {");
        assert_contains!(source, ".name = \"dev\",");
        assert_contains!(source, "/* 0x1000: Device type */");
        assert_contains!(source, ".code = CO_OBJECT_RECORD,");
        assert_contains!(source, ".def = { .u32 = 0x00000191 },");
        assert!(!source.contains("#include <config.h>"));
    }

    #[test]
    fn test_no_strings_drops_names() {
        let source = render(true, false);
        assert!(!source.contains(".name ="));
        assert!(!source.contains("Device type"));
    }

    #[test]
    fn test_include_config() {
        let source = render(false, true);
        assert_contains!(source, "#include <config.h>");
    }

    #[test]
    fn test_header() {
        let mut out = Vec::new();
        write_device_header(&mut out, "test_dev").unwrap();
        let header = String::from_utf8(out).unwrap();
        assert_contains!(header, "#ifndef TEST_DEV_H_");
        assert_contains!(header, "extern const co_dev_descriptor_t test_dev;");
    }
}
