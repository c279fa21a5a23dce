use std::fs::File;
use std::io::Read;
use std::path::Path;

use time::macros::format_description;
use time::{Date, PrimitiveDateTime, Time};

use super::data_block::DataBlock;
use super::eis::EisSweep;
use super::error::EisFileError;

/// Tag announcing the impedance table inside a DTA file.
pub const CURVE_MARKER: &str = "ZCURVE";
const DATE_TAG: &str = "DATE";
const TIME_TAG: &str = "TIME";

/// Where in the file the line-by-line scan currently is. A DTA file is a
/// run of TAB-separated metadata records, then the table marker, then one
/// header line, one units line, and the data rows.
enum Section {
    Metadata,
    Header,
    Units,
    Rows,
}

/// Read a DTA output file into `sweep`.
///
/// Metadata discoverable in the file (the DATE/TIME acquisition stamp) is
/// stored on the sweep; identity fields (SOC, step index, name) stay as the
/// sweep was constructed, since these files do not self-describe them. With
/// `require_timestamp` the DATE/TIME tags become mandatory. A malformed or
/// truncated file fails without touching the sweep, and a sweep that already
/// holds data refuses a second read.
pub fn read_dta_file(
    sweep: &mut EisSweep,
    path: &Path,
    require_timestamp: bool,
) -> Result<(), EisFileError> {
    if !path.exists() {
        return Err(EisFileError::BadFilePath(path.to_path_buf()));
    }
    let mut bytes = Vec::new();
    File::open(path)?.read_to_end(&mut bytes)?;
    // The phase unit cell holds a CP1252 degree glyph; decode lossily.
    let contents = String::from_utf8_lossy(&bytes);
    read_dta_data(sweep, &contents, path, require_timestamp)
}

pub(crate) fn read_dta_data(
    sweep: &mut EisSweep,
    contents: &str,
    path: &Path,
    require_timestamp: bool,
) -> Result<(), EisFileError> {
    if sweep.is_loaded() {
        return Err(EisFileError::AlreadyLoaded);
    }

    let mut section = Section::Metadata;
    let mut date_raw: Option<&str> = None;
    let mut time_raw: Option<&str> = None;
    let mut headers: Vec<String> = Vec::new();
    let mut names: Vec<&str> = Vec::new();
    let mut data = DataBlock::new();

    for (offset, line) in contents.lines().enumerate() {
        let line_number = offset + 1;
        match section {
            Section::Metadata => {
                let mut fields = line.split('\t');
                let tag = fields.next().unwrap_or("");
                if tag == CURVE_MARKER {
                    section = Section::Header;
                } else if tag == DATE_TAG {
                    // TAG, LABEL, value
                    date_raw = fields.nth(1);
                } else if tag == TIME_TAG {
                    time_raw = fields.nth(1);
                }
            }
            Section::Header => {
                names = split_table_row(line);
                if names.is_empty() {
                    return Err(EisFileError::TruncatedTable(path.to_path_buf()));
                }
                section = Section::Units;
            }
            Section::Units => {
                let units = split_table_row(line);
                if units.len() != names.len() {
                    return Err(EisFileError::MalformedRow {
                        path: path.to_path_buf(),
                        line: line_number,
                        found: units.len(),
                        expected: names.len(),
                    });
                }
                headers = join_headers(&names, &units);
                section = Section::Rows;
            }
            Section::Rows => {
                if line.trim().is_empty() {
                    continue;
                }
                let fields = split_table_row(line);
                if fields.len() != headers.len() {
                    return Err(EisFileError::MalformedRow {
                        path: path.to_path_buf(),
                        line: line_number,
                        found: fields.len(),
                        expected: headers.len(),
                    });
                }
                for (idx, field) in fields.iter().enumerate() {
                    match field.parse::<f64>() {
                        Ok(value) => data.push_float(&headers[idx], value),
                        Err(_) => {
                            return Err(EisFileError::BadValue {
                                path: path.to_path_buf(),
                                line: line_number,
                                value: field.to_string(),
                            })
                        }
                    }
                }
            }
        }
    }

    match section {
        Section::Metadata => return Err(EisFileError::MissingTable(path.to_path_buf())),
        Section::Header | Section::Units => {
            return Err(EisFileError::TruncatedTable(path.to_path_buf()))
        }
        Section::Rows => {
            if data.is_empty() {
                return Err(EisFileError::EmptyTable(path.to_path_buf()));
            }
        }
    }

    let acquired = parse_timestamp(date_raw, time_raw, path, require_timestamp)?;
    sweep.commit_data(data, acquired);
    Ok(())
}

fn split_table_row(line: &str) -> Vec<&str> {
    line.split('\t')
        .map(str::trim)
        .filter(|field| !field.is_empty())
        .collect()
}

/// Join column names with their units: `Freq` + `Hz` -> `Freq (Hz)`. The
/// phase unit is a degree glyph that does not survive re-encoding, so that
/// column gets a spelled-out unit instead.
fn join_headers(names: &[&str], units: &[&str]) -> Vec<String> {
    names
        .iter()
        .zip(units.iter())
        .map(|(name, unit)| {
            if *name == "Zphz" {
                String::from("Zphz (degrees)")
            } else {
                format!("{name} ({unit})")
            }
        })
        .collect()
}

fn parse_timestamp(
    date_raw: Option<&str>,
    time_raw: Option<&str>,
    path: &Path,
    require_timestamp: bool,
) -> Result<Option<PrimitiveDateTime>, EisFileError> {
    let (date_raw, time_raw) = match (date_raw, time_raw) {
        (Some(date), Some(time)) => (date, time),
        (None, _) if require_timestamp => {
            return Err(EisFileError::MissingTag(path.to_path_buf(), DATE_TAG))
        }
        (_, None) if require_timestamp => {
            return Err(EisFileError::MissingTag(path.to_path_buf(), TIME_TAG))
        }
        _ => return Ok(None),
    };

    let date_format = format_description!("[month padding:none]/[day padding:none]/[year]");
    let time_format = format_description!("[hour padding:none]:[minute]:[second]");
    let date = Date::parse(date_raw.trim(), &date_format).map_err(|_| EisFileError::BadTimestamp {
        path: path.to_path_buf(),
        tag: DATE_TAG,
        value: date_raw.to_string(),
    })?;
    let time = Time::parse(time_raw.trim(), &time_format).map_err(|_| EisFileError::BadTimestamp {
        path: path.to_path_buf(),
        tag: TIME_TAG,
        value: time_raw.to_string(),
    })?;
    Ok(Some(PrimitiveDateTime::new(date, time)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use time::macros::datetime;

    const DTA_FIXTURE: &str = "EXPLAIN\n\
        TAG\tEISPOT\n\
        TITLE\tLABEL\tPotentiostatic EIS\tTest Identifier\n\
        DATE\tLABEL\t3/3/2022\tDate\n\
        TIME\tLABEL\t13:27:31\tTime\n\
        PSTAT\tLABEL\tREF3000-28073\tPotentiostat\n\
        ZCURVE\tTABLE\t4\n\
        \tPt\tTime\tFreq\tZreal\tZimag\tZsig\tZmod\tZphz\tIdc\tVdc\tIERange\n\
        \t#\ts\tHz\tohm\tohm\tV\tohm\tdeg\tA\tV\t#\n\
        \t0\t1\t100019.5\t0.0229291\t-0.0030148\t1\t0.0231264\t-7.490437\t0.0018029\t3.760538\t12\n\
        \t1\t2\t46464.84\t0.0162025\t0.0022876\t1\t0.0163632\t8.036185\t0.0019511\t3.760587\t12\n\
        \t2\t4\t21621.09\t0.011836\t0.0034139\t1\t0.0123185\t16.08913\t0.0020157\t3.760552\t12\n\
        \t3\t5\t10019.53\t0.0093414\t0.0023389\t1\t0.0096298\t14.05653\t0.0020214\t3.760539\t12\n";

    fn test_path() -> PathBuf {
        PathBuf::from("sweep.DTA")
    }

    fn sweep() -> EisSweep {
        EisSweep::new(String::from("eis cycle1"), 0.5, 14).unwrap()
    }

    #[test]
    fn test_parse_full_file() {
        let mut sweep = sweep();
        read_dta_data(&mut sweep, DTA_FIXTURE, &test_path(), false).unwrap();

        assert!(sweep.is_loaded());
        assert_eq!(sweep.n_rows(), 4);
        let headers: Vec<&str> = sweep.headers().collect();
        assert_eq!(
            headers,
            vec![
                "Pt (#)",
                "Time (s)",
                "Freq (Hz)",
                "Zreal (ohm)",
                "Zimag (ohm)",
                "Zsig (V)",
                "Zmod (ohm)",
                "Zphz (degrees)",
                "Idc (A)",
                "Vdc (V)",
                "IERange (#)"
            ]
        );
        assert_eq!(
            sweep.floats("Freq (Hz)").unwrap(),
            &[100019.5, 46464.84, 21621.09, 10019.53]
        );
        assert_eq!(sweep.floats("Zimag (ohm)").unwrap()[0], -0.0030148);
        assert_eq!(sweep.to_array().shape(), &[4, 11]);
    }

    #[test]
    fn test_metadata_timestamp() {
        let mut sweep = sweep();
        read_dta_data(&mut sweep, DTA_FIXTURE, &test_path(), false).unwrap();

        assert_eq!(sweep.acquired(), Some(datetime!(2022-03-03 13:27:31)));
    }

    #[test]
    fn test_missing_timestamp_policy() {
        let contents: String = DTA_FIXTURE
            .lines()
            .filter(|line| !line.starts_with("DATE"))
            .map(|line| format!("{line}\n"))
            .collect();

        let mut lenient = sweep();
        read_dta_data(&mut lenient, &contents, &test_path(), false).unwrap();
        assert_eq!(lenient.acquired(), None);

        let mut strict = sweep();
        let result = read_dta_data(&mut strict, &contents, &test_path(), true);
        assert!(matches!(result, Err(EisFileError::MissingTag(_, "DATE"))));
        assert!(!strict.is_loaded());
    }

    #[test]
    fn test_missing_table_marker() {
        let contents = "EXPLAIN\nTAG\tEISPOT\nDATE\tLABEL\t3/3/2022\tDate\n";
        let mut sweep = sweep();
        let result = read_dta_data(&mut sweep, contents, &test_path(), false);

        assert!(matches!(result, Err(EisFileError::MissingTable(_))));
        assert!(!sweep.is_loaded());
    }

    #[test]
    fn test_truncated_table() {
        // File ends right after the header line; no units, no data.
        let cut = DTA_FIXTURE
            .lines()
            .take(8)
            .map(|line| format!("{line}\n"))
            .collect::<String>();
        let mut sweep = sweep();
        let result = read_dta_data(&mut sweep, &cut, &test_path(), false);

        assert!(matches!(result, Err(EisFileError::TruncatedTable(_))));
    }

    #[test]
    fn test_empty_table() {
        let cut = DTA_FIXTURE
            .lines()
            .take(9)
            .map(|line| format!("{line}\n"))
            .collect::<String>();
        let mut sweep = sweep();
        let result = read_dta_data(&mut sweep, &cut, &test_path(), false);

        assert!(matches!(result, Err(EisFileError::EmptyTable(_))));
    }

    #[test]
    fn test_garbled_value_rejects_file() {
        let contents = DTA_FIXTURE.replace("21621.09", "2162#.09");
        let mut sweep = sweep();
        let result = read_dta_data(&mut sweep, &contents, &test_path(), false);

        assert!(matches!(result, Err(EisFileError::BadValue { .. })));
        assert!(!sweep.is_loaded());
        assert_eq!(sweep.n_rows(), 0);
    }

    #[test]
    fn test_short_row_rejects_file() {
        let contents = DTA_FIXTURE.replace("\t3\t5\t10019.53", "\t3\t5");
        let mut sweep = sweep();
        let result = read_dta_data(&mut sweep, &contents, &test_path(), false);

        assert!(matches!(result, Err(EisFileError::MalformedRow { .. })));
    }

    #[test]
    fn test_read_once() {
        let mut sweep = sweep();
        read_dta_data(&mut sweep, DTA_FIXTURE, &test_path(), false).unwrap();
        let result = read_dta_data(&mut sweep, DTA_FIXTURE, &test_path(), false);

        assert!(matches!(result, Err(EisFileError::AlreadyLoaded)));
    }
}
