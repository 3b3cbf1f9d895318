//! C4 — stats parser. Turns the `show stat` CSV dump into typed
//! per-service records, and `show info` lines into a typed daemon-metadata
//! record.

use std::collections::BTreeMap;
use std::fmt;

use regex::Regex;

/// Column order of the `show stat` CSV, fixed by the proxy's own stats
/// format (§6). Re-ordering these breaks `get_idx`.
const NUMFIELDS: usize = 51;
const IDX_STATUS: usize = 17;
const IDX_CHECK_STATUS: usize = 36;
const IDX_PID: usize = 26;
const IDX_IID: usize = 27;
const IDX_SID: usize = 28;
const IDX_TYPE: usize = 32;
const IDX_SVNAME: usize = 1;

const MAX_SERVICES_FAST_PATH: usize = 100;

/// A single `show stat` row, coerced to typed fields.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendStat {
    pub pxname: String,
    pub svname: String,
    pub qcur: i64,
    pub qmax: i64,
    pub scur: i64,
    pub smax: i64,
    pub slim: i64,
    pub stot: i64,
    pub bin: i64,
    pub bout: i64,
    pub dreq: i64,
    pub dresp: i64,
    pub ereq: i64,
    pub econ: i64,
    pub eresp: i64,
    pub wretr: i64,
    pub wredis: i64,
    pub status: String,
    pub weight: i64,
    pub act: i64,
    pub bck: i64,
    pub chkfail: i64,
    pub chkdown: i64,
    pub lastchg: i64,
    pub downtime: i64,
    pub qlimit: i64,
    pub pid: i64,
    pub iid: i64,
    pub sid: i64,
    pub throttle: i64,
    pub lbtot: i64,
    pub tracked: String,
    pub service_type: i64,
    pub rate: i64,
    pub rate_lim: i64,
    pub rate_max: i64,
    pub check_status: String,
    pub check_code: i64,
    pub check_duration: i64,
    pub hrsp_1xx: i64,
    pub hrsp_2xx: i64,
    pub hrsp_3xx: i64,
    pub hrsp_4xx: i64,
    pub hrsp_5xx: i64,
    pub hrsp_other: i64,
    pub hanafail: String,
    pub req_rate: i64,
    pub req_rate_max: i64,
    pub req_tot: i64,
    pub cli_abrt: i64,
    pub srv_abrt: i64,
}

impl BackendStat {
    /// Re-formats the record in the fixed 51-column order of §6, the
    /// inverse of `parse_stat`'s field layout.
    pub fn to_csv_row(&self) -> String {
        format!(
            "{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{}",
            self.pxname,
            self.svname,
            self.qcur,
            self.qmax,
            self.scur,
            self.smax,
            self.slim,
            self.stot,
            self.bin,
            self.bout,
            self.dreq,
            self.dresp,
            self.ereq,
            self.econ,
            self.eresp,
            self.wretr,
            self.wredis,
            self.status,
            self.weight,
            self.act,
            self.bck,
            self.chkfail,
            self.chkdown,
            self.lastchg,
            self.downtime,
            self.qlimit,
            self.pid,
            self.iid,
            self.sid,
            self.throttle,
            self.lbtot,
            self.tracked,
            self.service_type,
            self.rate,
            self.rate_lim,
            self.rate_max,
            self.check_status,
            self.check_code,
            self.check_duration,
            self.hrsp_1xx,
            self.hrsp_2xx,
            self.hrsp_3xx,
            self.hrsp_4xx,
            self.hrsp_5xx,
            self.hrsp_other,
            self.hanafail,
            self.req_rate,
            self.req_rate_max,
            self.req_tot,
            self.cli_abrt,
            self.srv_abrt,
        )
    }
}

/// `iid -> service_id -> record`. `service_id` is `svname` for
/// FRONTEND/BACKEND rows (type 0/1), and the numeric `sid` otherwise.
pub type StatTable = BTreeMap<i64, BTreeMap<String, BackendStat>>;

/// Result of parsing a `show stat` reply.
#[derive(Debug, Clone, Default)]
pub struct ParsedStats {
    pub table: StatTable,
    pub pxcount: u32,
    pub svcount: u32,
}

/// A field failed to coerce, or a row was too short to parse.
#[derive(Debug, Clone, PartialEq)]
pub enum MalformedStats {
    ShortRow { fields: usize, expected: usize },
    BadField { field: &'static str, value: String },
}

impl fmt::Display for MalformedStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MalformedStats::ShortRow { fields, expected } => write!(
                f,
                "malformed stats row: {} fields, expected at least {}",
                fields, expected
            ),
            MalformedStats::BadField { field, value } => {
                write!(f, "garbage field: {}=\"{}\"", field, value)
            }
        }
    }
}

impl std::error::Error for MalformedStats {}

/// Service-count drift between successive polls: logged as a warning, not
/// fatal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfigDrift {
    pub proxy_delta: i64,
    pub service_delta: i64,
}

impl fmt::Display for ConfigDrift {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "config changed: proxy {:+}, service {:+}",
            self.proxy_delta, self.service_delta
        )
    }
}

fn parse_int(field: &'static str, value: &str) -> Result<i64, MalformedStats> {
    if value.is_empty() {
        return Ok(0);
    }
    value
        .parse::<i64>()
        .map_err(|_| MalformedStats::BadField {
            field,
            value: value.to_string(),
        })
}

/// Parses the body lines of a `show stat` reply (comment lines starting
/// with `#` are skipped by the caller or here).
pub fn parse_stat(lines: impl IntoIterator<Item = impl AsRef<str>>) -> Result<ParsedStats, MalformedStats> {
    let mut table: StatTable = BTreeMap::new();
    let mut pxcount: u32 = 0;
    let mut svcount: u32 = 0;

    for line in lines {
        let line = line.as_ref();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split(',').collect();
        if fields.len() < NUMFIELDS {
            continue; // unknown format, matching the source's tolerant skip
        }

        if svcount as usize > MAX_SERVICES_FAST_PATH {
            let iid = parse_int("iid", fields[IDX_IID])?;
            let sid_str = fields[IDX_SID];
            let sid = parse_int("sid", sid_str)?;
            let entry = table.entry(iid).or_default();
            if entry.is_empty() {
                pxcount += 1;
                svcount += 1;
            } else if !entry.contains_key(&sid.to_string()) {
                svcount += 1;
            }
            continue;
        }

        let stype = parse_int("type", fields[IDX_TYPE])?;
        let status = fields[IDX_STATUS].to_string();
        let status = if status == "no check" { "-".to_string() } else { status };
        let check_status_raw = fields[IDX_CHECK_STATUS].to_string();
        let check_status = if status == "-" { "none".to_string() } else { check_status_raw };

        let record = BackendStat {
            pxname: fields[0].to_string(),
            svname: fields[IDX_SVNAME].to_string(),
            qcur: parse_int("qcur", fields[2])?,
            qmax: parse_int("qmax", fields[3])?,
            scur: parse_int("scur", fields[4])?,
            smax: parse_int("smax", fields[5])?,
            slim: parse_int("slim", fields[6])?,
            stot: parse_int("stot", fields[7])?,
            bin: parse_int("bin", fields[8])?,
            bout: parse_int("bout", fields[9])?,
            dreq: parse_int("dreq", fields[10])?,
            dresp: parse_int("dresp", fields[11])?,
            ereq: parse_int("ereq", fields[12])?,
            econ: parse_int("econ", fields[13])?,
            eresp: parse_int("eresp", fields[14])?,
            wretr: parse_int("wretr", fields[15])?,
            wredis: parse_int("wredis", fields[16])?,
            status,
            weight: parse_int("weight", fields[18])?,
            act: parse_int("act", fields[19])?,
            bck: parse_int("bck", fields[20])?,
            chkfail: parse_int("chkfail", fields[21])?,
            chkdown: parse_int("chkdown", fields[22])?,
            lastchg: parse_int("lastchg", fields[23])?,
            downtime: parse_int("downtime", fields[24])?,
            qlimit: parse_int("qlimit", fields[25])?,
            pid: parse_int("pid", fields[IDX_PID])?,
            iid: parse_int("iid", fields[IDX_IID])?,
            sid: parse_int("sid", fields[IDX_SID])?,
            throttle: parse_int("throttle", fields[29])?,
            lbtot: parse_int("lbtot", fields[30])?,
            tracked: fields[31].to_string(),
            service_type: stype,
            rate: parse_int("rate", fields[33])?,
            rate_lim: parse_int("rate_lim", fields[34])?,
            rate_max: parse_int("rate_max", fields[35])?,
            check_status,
            check_code: parse_int("check_code", fields[37])?,
            check_duration: parse_int("check_duration", fields[38])?,
            hrsp_1xx: parse_int("hrsp_1xx", fields[39])?,
            hrsp_2xx: parse_int("hrsp_2xx", fields[40])?,
            hrsp_3xx: parse_int("hrsp_3xx", fields[41])?,
            hrsp_4xx: parse_int("hrsp_4xx", fields[42])?,
            hrsp_5xx: parse_int("hrsp_5xx", fields[43])?,
            hrsp_other: parse_int("hrsp_other", fields[44])?,
            hanafail: fields[45].to_string(),
            req_rate: parse_int("req_rate", fields[46])?,
            req_rate_max: parse_int("req_rate_max", fields[47])?,
            req_tot: parse_int("req_tot", fields[48])?,
            cli_abrt: parse_int("cli_abrt", fields[49])?,
            srv_abrt: parse_int("srv_abrt", fields[50])?,
        };

        let service_id = if stype == 0 || stype == 1 {
            record.svname.clone()
        } else {
            record.sid.to_string()
        };

        let entry = table.entry(record.iid).or_default();
        if entry.is_empty() {
            pxcount += 1;
        }
        if !entry.contains_key(&service_id) {
            svcount += 1;
        }
        entry.insert(service_id, record);
    }

    Ok(ParsedStats { table, pxcount, svcount })
}

/// Compares `pxcount`/`svcount` across two polls, returning `Some` when
/// they differ (a config reload likely happened underneath).
pub fn detect_drift(old: &ParsedStats, new: &ParsedStats) -> Option<ConfigDrift> {
    let mut pxdiff: i64 = 0;
    let mut svdiff: i64 = 0;
    if new.pxcount < old.pxcount {
        pxdiff -= (old.pxcount - new.pxcount) as i64;
    }
    if old.pxcount > 0 && new.pxcount > old.pxcount {
        pxdiff += (new.pxcount - old.pxcount) as i64;
    }
    if new.svcount < old.svcount {
        svdiff -= (old.svcount - new.svcount) as i64;
    }
    if old.svcount > 0 && new.svcount > old.svcount {
        svdiff += (new.svcount - old.svcount) as i64;
    }
    if pxdiff != 0 || svdiff != 0 {
        Some(ConfigDrift {
            proxy_delta: pxdiff,
            service_delta: svdiff,
        })
    } else {
        None
    }
}

/// Daemon metadata returned by `show info`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DaemonInfo {
    pub software_name: String,
    pub software_version: String,
    pub software_release: String,
    pub nproc: u32,
    pub process_num: u32,
    pub pid: u32,
    pub uptime: String,
    pub maxconn: u32,
    pub curr_conns: u32,
    pub max_pipes: u32,
    pub curr_pipes: u32,
    pub tasks: u32,
    pub run_queue: u32,
    pub node: String,
}

macro_rules! info_field_str {
    ($map:expr, $key:literal) => {
        $map.get($key)
            .ok_or(MalformedStats::BadField {
                field: $key,
                value: String::new(),
            })?
            .clone()
    };
}

macro_rules! info_field_num {
    ($map:expr, $key:literal) => {{
        let raw = $map.get($key).ok_or(MalformedStats::BadField {
            field: $key,
            value: String::new(),
        })?;
        raw.parse().map_err(|_| MalformedStats::BadField {
            field: $key,
            value: raw.clone(),
        })?
    }};
}

/// Parses `show info` lines (`Key: value`) into a typed `DaemonInfo`. A
/// reply missing an expected key is `MalformedStats`, naming the key.
pub fn parse_info(lines: impl IntoIterator<Item = impl AsRef<str>>) -> Result<DaemonInfo, MalformedStats> {
    let patterns: &[(&str, &str)] = &[
        ("software_name", r"^Name:\s*(\S+)"),
        ("software_version", r"^Version:\s*(\S+)"),
        ("software_release", r"^Release_date:\s*(\S+)"),
        ("nproc", r"^Nbproc:\s*(\d+)"),
        ("procn", r"^Process_num:\s*(\d+)"),
        ("pid", r"^Pid:\s*(\d+)"),
        ("uptime", r"^Uptime:\s*([\S ]+)$"),
        ("maxconn", r"^Maxconn:\s*(\d+)"),
        ("curconn", r"^CurrConns:\s*(\d+)"),
        ("maxpipes", r"^Maxpipes:\s*(\d+)"),
        ("curpipes", r"^PipesUsed:\s*(\d+)"),
        ("tasks", r"^Tasks:\s*(\d+)"),
        ("runqueue", r"^Run_queue:\s*(\d+)"),
        ("node", r"^node:\s*(\S+)"),
    ];

    let mut found: std::collections::HashMap<&str, String> = std::collections::HashMap::new();
    for line in lines {
        let line = line.as_ref();
        for (key, pattern) in patterns {
            if found.contains_key(key) {
                continue;
            }
            let re = Regex::new(pattern).expect("static info regex is valid");
            if let Some(caps) = re.captures(line) {
                found.insert(key, caps[1].to_string());
            }
        }
    }

    Ok(DaemonInfo {
        software_name: info_field_str!(found, "software_name"),
        software_version: info_field_str!(found, "software_version"),
        software_release: info_field_str!(found, "software_release"),
        nproc: info_field_num!(found, "nproc"),
        process_num: info_field_num!(found, "procn"),
        pid: info_field_num!(found, "pid"),
        uptime: info_field_str!(found, "uptime"),
        maxconn: info_field_num!(found, "maxconn"),
        curr_conns: info_field_num!(found, "curconn"),
        max_pipes: info_field_num!(found, "maxpipes"),
        curr_pipes: info_field_num!(found, "curpipes"),
        tasks: info_field_num!(found, "tasks"),
        run_queue: info_field_num!(found, "runqueue"),
        node: info_field_str!(found, "node"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_row(scur: &str, stot: &str, act: &str, status: &str) -> String {
        // pxname,svname,qcur,qmax,scur,smax,slim,stot,bin,bout,dreq,dresp,ereq,
        // econ,eresp,wretr,wredis,status,weight,act,bck,chkfail,chkdown,lastchg,
        // downtime,qlimit,pid,iid,sid,throttle,lbtot,tracked,type,rate,rate_lim,
        // rate_max,check_status,check_code,check_duration,hrsp_1xx..5xx,hrsp_other,
        // hanafail,req_rate,req_rate_max,req_tot,cli_abrt,srv_abrt
        format!(
            "www,BACKEND,0,0,{scur},0,0,{stot},0,0,0,0,0,0,0,0,0,{status},1,{act},0,0,0,0,0,0,1,2,0,0,0,,1,0,0,0,,0,0,0,0,0,0,0,0,,0,0,0,0,0",
        )
    }

    #[test]
    fn parses_typed_record_with_int_coercion() {
        let row = sample_row("50", "10000", "8", "UP");
        let parsed = parse_stat(vec![row]).unwrap();
        let rec = &parsed.table[&2]["BACKEND"];
        assert_eq!(rec.scur, 50);
        assert_eq!(rec.stot, 10000);
        assert_eq!(rec.act, 8);
        assert_eq!(parsed.pxcount, 1);
        assert_eq!(parsed.svcount, 1);
    }

    #[test]
    fn no_check_status_becomes_dash_and_check_status_becomes_none() {
        let row = sample_row("0", "0", "0", "no check");
        let parsed = parse_stat(vec![row]).unwrap();
        let rec = &parsed.table[&2]["BACKEND"];
        assert_eq!(rec.status, "-");
        assert_eq!(rec.check_status, "none");
    }

    #[test]
    fn skips_comment_and_short_lines() {
        let parsed = parse_stat(vec!["# comment line".to_string(), "too,short".to_string()]).unwrap();
        assert_eq!(parsed.pxcount, 0);
    }

    #[test]
    fn round_trips_through_csv_row() {
        let row = sample_row("50", "10000", "8", "UP");
        let parsed = parse_stat(vec![row.clone()]).unwrap();
        let rec = &parsed.table[&2]["BACKEND"];
        assert_eq!(rec.to_csv_row(), row);
    }

    #[test]
    fn detects_config_drift_on_service_count_change() {
        let old = ParsedStats {
            table: StatTable::new(),
            pxcount: 2,
            svcount: 10,
        };
        let new = ParsedStats {
            table: StatTable::new(),
            pxcount: 2,
            svcount: 12,
        };
        let drift = detect_drift(&old, &new).unwrap();
        assert_eq!(drift.service_delta, 2);
        assert_eq!(drift.proxy_delta, 0);
    }

    #[test]
    fn parse_info_extracts_known_fields() {
        let lines = vec![
            "Name: HAProxy".to_string(),
            "Version: 1.5.0".to_string(),
            "Release_date: 2013/01/01".to_string(),
            "Nbproc: 1".to_string(),
            "Process_num: 1".to_string(),
            "Pid: 4242".to_string(),
            "Uptime: 3d 04h23m19s".to_string(),
            "Maxconn: 2000".to_string(),
            "CurrConns: 12".to_string(),
            "Maxpipes: 0".to_string(),
            "PipesUsed: 0".to_string(),
            "Tasks: 4".to_string(),
            "Run_queue: 0".to_string(),
            "node: haproxy1".to_string(),
        ];
        let info = parse_info(lines).unwrap();
        assert_eq!(info.pid, 4242);
        assert_eq!(info.node, "haproxy1");
        assert_eq!(info.uptime, "3d 04h23m19s");
    }

    #[test]
    fn parse_info_fails_on_missing_key() {
        let lines = vec!["Name: HAProxy".to_string()];
        assert!(parse_info(lines).is_err());
    }
}
