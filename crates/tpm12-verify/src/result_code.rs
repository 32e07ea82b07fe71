// SPDX-License-Identifier: MIT OR Apache-2.0

//! TPM_RESULT return codes and their symbolic names

/// Successful completion
pub const TPM_SUCCESS: u32 = 0x0000_0000;

/// Authentication failed
pub const TPM_AUTHFAIL: u32 = 0x0000_0001;

/// The index to a PCR, DIR or other register is incorrect
pub const TPM_BADINDEX: u32 = 0x0000_0002;

/// One or more parameters is bad
pub const TPM_BAD_PARAMETER: u32 = 0x0000_0003;

/// Internal failure
pub const TPM_FAIL: u32 = 0x0000_0009;

/// The ordinal was unknown or inconsistent
pub const TPM_BAD_ORDINAL: u32 = 0x0000_000A;

/// The key handle can not be interpreted
pub const TPM_INVALID_KEYHANDLE: u32 = 0x0000_000C;

/// No room to load another session or key
pub const TPM_RESOURCES: u32 = 0x0000_0015;

/// An invalid handle was used
pub const TPM_INVALID_AUTHHANDLE: u32 = 0x0000_0022;

/// The second authorization of a two-session command failed
pub const TPM_AUTH2FAIL: u32 = 0x0000_001D;

/// Mask marking a non-fatal return code
pub const TPM_NON_FATAL: u32 = 0x0000_0800;

/// Symbolic name for a TPM_RESULT code, `UNKNOWN_RESULT` if it is not defined
pub fn result_name(code: u32) -> &'static str {
    match code {
        0 => "TPM_SUCCESS",
        1 => "TPM_AUTHFAIL",
        2 => "TPM_BADINDEX",
        3 => "TPM_BAD_PARAMETER",
        4 => "TPM_AUDITFAILURE",
        5 => "TPM_CLEAR_DISABLED",
        6 => "TPM_DEACTIVATED",
        7 => "TPM_DISABLED",
        8 => "TPM_DISABLED_CMD",
        9 => "TPM_FAIL",
        10 => "TPM_BAD_ORDINAL",
        11 => "TPM_INSTALL_DISABLED",
        12 => "TPM_INVALID_KEYHANDLE",
        13 => "TPM_KEYNOTFOUND",
        14 => "TPM_INAPPROPRIATE_ENC",
        15 => "TPM_MIGRATEFAIL",
        16 => "TPM_INVALID_PCR_INFO",
        17 => "TPM_NOSPACE",
        18 => "TPM_NOSRK",
        19 => "TPM_NOTSEALED_BLOB",
        20 => "TPM_OWNER_SET",
        21 => "TPM_RESOURCES",
        22 => "TPM_SHORTRANDOM",
        23 => "TPM_SIZE",
        24 => "TPM_WRONGPCRVAL",
        25 => "TPM_BAD_PARAM_SIZE",
        26 => "TPM_SHA_THREAD",
        27 => "TPM_SHA_ERROR",
        28 => "TPM_FAILEDSELFTEST",
        29 => "TPM_AUTH2FAIL",
        30 => "TPM_BADTAG",
        31 => "TPM_IOERROR",
        32 => "TPM_ENCRYPT_ERROR",
        33 => "TPM_DECRYPT_ERROR",
        34 => "TPM_INVALID_AUTHHANDLE",
        35 => "TPM_NO_ENDORSEMENT",
        36 => "TPM_INVALID_KEYUSAGE",
        37 => "TPM_WRONG_ENTITYTYPE",
        38 => "TPM_INVALID_POSTINIT",
        39 => "TPM_INAPPROPRIATE_SIG",
        40 => "TPM_BAD_KEY_PROPERTY",
        41 => "TPM_BAD_MIGRATION",
        42 => "TPM_BAD_SCHEME",
        43 => "TPM_BAD_DATASIZE",
        44 => "TPM_BAD_MODE",
        45 => "TPM_BAD_PRESENCE",
        46 => "TPM_BAD_VERSION",
        47 => "TPM_NO_WRAP_TRANSPORT",
        48 => "TPM_AUDITFAIL_UNSUCCESSFUL",
        49 => "TPM_AUDITFAIL_SUCCESSFUL",
        50 => "TPM_NOTRESETABLE",
        51 => "TPM_NOTLOCAL",
        52 => "TPM_BAD_TYPE",
        53 => "TPM_INVALID_RESOURCE",
        54 => "TPM_NOTFIPS",
        55 => "TPM_INVALID_FAMILY",
        56 => "TPM_NO_NV_PERMISSION",
        57 => "TPM_REQUIRES_SIGN",
        58 => "TPM_KEY_NOTSUPPORTED",
        59 => "TPM_AUTH_CONFLICT",
        60 => "TPM_AREA_LOCKED",
        61 => "TPM_BAD_LOCALITY",
        62 => "TPM_READ_ONLY",
        63 => "TPM_PER_NOWRITE",
        64 => "TPM_FAMILYCOUNT",
        65 => "TPM_WRITE_LOCKED",
        66 => "TPM_BAD_ATTRIBUTES",
        67 => "TPM_INVALID_STRUCTURE",
        68 => "TPM_KEY_OWNER_CONTROL",
        69 => "TPM_BAD_COUNTER",
        70 => "TPM_NOT_FULLWRITE",
        71 => "TPM_CONTEXT_GAP",
        72 => "TPM_MAXNVWRITES",
        73 => "TPM_NOOPERATOR",
        74 => "TPM_RESOURCEMISSING",
        75 => "TPM_DELEGATE_LOCK",
        76 => "TPM_DELEGATE_FAMILY",
        77 => "TPM_DELEGATE_ADMIN",
        78 => "TPM_TRANSPORT_NOTEXCLUSIVE",
        79 => "TPM_OWNER_CONTROL",
        80 => "TPM_DAA_RESOURCES",
        81 => "TPM_DAA_INPUT_DATA0",
        82 => "TPM_DAA_INPUT_DATA1",
        83 => "TPM_DAA_ISSUER_SETTINGS",
        84 => "TPM_DAA_TPM_SETTINGS",
        85 => "TPM_DAA_STAGE",
        86 => "TPM_DAA_ISSUER_VALIDITY",
        87 => "TPM_DAA_WRONG_W",
        88 => "TPM_BAD_HANDLE",
        89 => "TPM_BAD_DELEGATE",
        90 => "TPM_BADCONTEXT",
        91 => "TPM_TOOMANYCONTEXTS",
        92 => "TPM_MA_TICKET_SIGNATURE",
        93 => "TPM_MA_DESTINATION",
        94 => "TPM_MA_SOURCE",
        95 => "TPM_MA_AUTHORITY",
        97 => "TPM_PERMANENTEK",
        98 => "TPM_BAD_SIGNATURE",
        0x800 => "TPM_RETRY",
        0x801 => "TPM_NEEDS_SELFTEST",
        0x802 => "TPM_DOING_SELFTEST",
        0x803 => "TPM_DEFEND_LOCK_RUNNING",
        _ => "UNKNOWN_RESULT",
    }
}

/// Whether the code only asks the caller to resubmit later
pub fn is_non_fatal(code: u32) -> bool {
    code & TPM_NON_FATAL != 0
}
