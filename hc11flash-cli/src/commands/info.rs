//! S-record info and port listing command implementations.

use {
    crate::serial::describe_port,
    anyhow::{Context, Result},
    console::style,
    hc11flash::{ImageSummary, NativePortEnumerator, PortEnumerator, PortInfo, SrecImage},
    std::path::Path,
};

/// List ports command implementation.
pub(crate) fn cmd_list_ports(json: bool) -> Result<()> {
    let ports = NativePortEnumerator::list_ports()?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&ports_json(&ports))?
        );
        return Ok(());
    }

    eprintln!("{}", style("Available serial ports").bold().underlined());
    if ports.is_empty() {
        eprintln!("  {}", style("No serial ports found").dim());
    }
    for port in &ports {
        println!("{}", describe_port(port));
    }

    Ok(())
}

fn ports_json(ports: &[PortInfo]) -> serde_json::Value {
    let ports: Vec<serde_json::Value> = ports
        .iter()
        .map(|p| {
            serde_json::json!({
                "name": p.name,
                "vid": p.vid,
                "pid": p.pid,
                "manufacturer": p.manufacturer,
                "product": p.product,
                "serial": p.serial_number,
            })
        })
        .collect();
    serde_json::json!({
        "ok": true,
        "data": {
            "ports": ports,
        }
    })
}

/// Info command implementation.
pub(crate) fn cmd_info(file: &Path, json: bool) -> Result<()> {
    let image = SrecImage::from_file(file)
        .with_context(|| format!("Failed to load S-record file {}", file.display()))?;
    let summary = image.summary();

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&summary_json(file, &summary))?
        );
        return Ok(());
    }

    for line in summary_lines(file, &summary) {
        println!("{line}");
    }
    Ok(())
}

fn summary_lines(file: &Path, summary: &ImageSummary) -> Vec<String> {
    let span = match (summary.lowest, summary.highest) {
        (Some(lo), Some(hi)) => format!("0x{lo:04X}-0x{hi:04X}"),
        _ => "empty".to_string(),
    };
    let checksums = if summary.bad_checksums == 0 {
        "all valid".to_string()
    } else {
        format!("{} invalid", summary.bad_checksums)
    };

    vec![
        format!("File:       {}", file.display()),
        format!("Records:    {}", summary.records),
        format!("Data bytes: {}", summary.data_bytes),
        format!("Span:       {span}"),
        format!("Checksums:  {checksums}"),
    ]
}

fn summary_json(file: &Path, summary: &ImageSummary) -> serde_json::Value {
    serde_json::json!({
        "ok": true,
        "data": {
            "file": file.display().to_string(),
            "records": summary.records,
            "data_bytes": summary.data_bytes,
            "lowest": summary.lowest,
            "highest": summary.highest,
            "bad_checksums": summary.bad_checksums,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary() -> ImageSummary {
        ImageSummary {
            records: 3,
            data_bytes: 40,
            lowest: Some(0xB600),
            highest: Some(0xB627),
            bad_checksums: 0,
        }
    }

    #[test]
    fn test_summary_lines() {
        let lines = summary_lines(Path::new("prog.s19"), &summary());
        assert_eq!(lines[1], "Records:    3");
        assert_eq!(lines[2], "Data bytes: 40");
        assert_eq!(lines[3], "Span:       0xB600-0xB627");
        assert_eq!(lines[4], "Checksums:  all valid");
    }

    #[test]
    fn test_summary_lines_empty_and_bad() {
        let s = ImageSummary {
            records: 1,
            data_bytes: 0,
            lowest: None,
            highest: None,
            bad_checksums: 1,
        };
        let lines = summary_lines(Path::new("x.s19"), &s);
        assert_eq!(lines[3], "Span:       empty");
        assert_eq!(lines[4], "Checksums:  1 invalid");
    }

    #[test]
    fn test_summary_json_shape() {
        let v = summary_json(Path::new("prog.s19"), &summary());
        assert_eq!(v["ok"], true);
        assert_eq!(v["data"]["records"], 3);
        assert_eq!(v["data"]["lowest"], 0xB600);
    }

    #[test]
    fn test_ports_json_shape() {
        let ports = vec![PortInfo {
            name: "/dev/ttyUSB0".to_string(),
            vid: Some(0x0403),
            pid: Some(0x6001),
            manufacturer: Some("FTDI".to_string()),
            product: None,
            serial_number: None,
        }];
        let v = ports_json(&ports);
        assert_eq!(v["data"]["ports"][0]["name"], "/dev/ttyUSB0");
        assert_eq!(v["data"]["ports"][0]["vid"], 0x0403);
        assert!(v["data"]["ports"][0]["product"].is_null());
    }

    #[test]
    fn test_cmd_info_missing_file() {
        let err = cmd_info(Path::new("/nonexistent/prog.s19"), false).unwrap_err();
        assert!(err.downcast_ref::<hc11flash::Error>().is_some());
    }
}
