//! Latin text encodings and glyph names.
//!
//! Simple fonts map one-byte codes to glyph names through a base encoding
//! plus `/Differences`; embedded programs are then searched by name or by
//! the Unicode value of the name.

use rustc_hash::FxHashMap;
use std::sync::LazyLock;

/// Glyph name, Unicode value, and code in StandardEncoding,
/// MacRomanEncoding and WinAnsiEncoding.
type LatinGlyph = (&'static str, u16, Option<u8>, Option<u8>, Option<u8>);

#[rustfmt::skip]
const LATIN_CHARSET: &[LatinGlyph] = &[
    ("space", 0x0020, Some(32), Some(32), Some(32)),
    ("exclam", 0x0021, Some(33), Some(33), Some(33)),
    ("quotedbl", 0x0022, Some(34), Some(34), Some(34)),
    ("numbersign", 0x0023, Some(35), Some(35), Some(35)),
    ("dollar", 0x0024, Some(36), Some(36), Some(36)),
    ("percent", 0x0025, Some(37), Some(37), Some(37)),
    ("ampersand", 0x0026, Some(38), Some(38), Some(38)),
    ("quotesingle", 0x0027, Some(169), Some(39), Some(39)),
    ("parenleft", 0x0028, Some(40), Some(40), Some(40)),
    ("parenright", 0x0029, Some(41), Some(41), Some(41)),
    ("asterisk", 0x002A, Some(42), Some(42), Some(42)),
    ("plus", 0x002B, Some(43), Some(43), Some(43)),
    ("comma", 0x002C, Some(44), Some(44), Some(44)),
    ("hyphen", 0x002D, Some(45), Some(45), Some(45)),
    ("period", 0x002E, Some(46), Some(46), Some(46)),
    ("slash", 0x002F, Some(47), Some(47), Some(47)),
    ("zero", 0x0030, Some(48), Some(48), Some(48)),
    ("one", 0x0031, Some(49), Some(49), Some(49)),
    ("two", 0x0032, Some(50), Some(50), Some(50)),
    ("three", 0x0033, Some(51), Some(51), Some(51)),
    ("four", 0x0034, Some(52), Some(52), Some(52)),
    ("five", 0x0035, Some(53), Some(53), Some(53)),
    ("six", 0x0036, Some(54), Some(54), Some(54)),
    ("seven", 0x0037, Some(55), Some(55), Some(55)),
    ("eight", 0x0038, Some(56), Some(56), Some(56)),
    ("nine", 0x0039, Some(57), Some(57), Some(57)),
    ("colon", 0x003A, Some(58), Some(58), Some(58)),
    ("semicolon", 0x003B, Some(59), Some(59), Some(59)),
    ("less", 0x003C, Some(60), Some(60), Some(60)),
    ("equal", 0x003D, Some(61), Some(61), Some(61)),
    ("greater", 0x003E, Some(62), Some(62), Some(62)),
    ("question", 0x003F, Some(63), Some(63), Some(63)),
    ("at", 0x0040, Some(64), Some(64), Some(64)),
    ("A", 0x0041, Some(65), Some(65), Some(65)),
    ("B", 0x0042, Some(66), Some(66), Some(66)),
    ("C", 0x0043, Some(67), Some(67), Some(67)),
    ("D", 0x0044, Some(68), Some(68), Some(68)),
    ("E", 0x0045, Some(69), Some(69), Some(69)),
    ("F", 0x0046, Some(70), Some(70), Some(70)),
    ("G", 0x0047, Some(71), Some(71), Some(71)),
    ("H", 0x0048, Some(72), Some(72), Some(72)),
    ("I", 0x0049, Some(73), Some(73), Some(73)),
    ("J", 0x004A, Some(74), Some(74), Some(74)),
    ("K", 0x004B, Some(75), Some(75), Some(75)),
    ("L", 0x004C, Some(76), Some(76), Some(76)),
    ("M", 0x004D, Some(77), Some(77), Some(77)),
    ("N", 0x004E, Some(78), Some(78), Some(78)),
    ("O", 0x004F, Some(79), Some(79), Some(79)),
    ("P", 0x0050, Some(80), Some(80), Some(80)),
    ("Q", 0x0051, Some(81), Some(81), Some(81)),
    ("R", 0x0052, Some(82), Some(82), Some(82)),
    ("S", 0x0053, Some(83), Some(83), Some(83)),
    ("T", 0x0054, Some(84), Some(84), Some(84)),
    ("U", 0x0055, Some(85), Some(85), Some(85)),
    ("V", 0x0056, Some(86), Some(86), Some(86)),
    ("W", 0x0057, Some(87), Some(87), Some(87)),
    ("X", 0x0058, Some(88), Some(88), Some(88)),
    ("Y", 0x0059, Some(89), Some(89), Some(89)),
    ("Z", 0x005A, Some(90), Some(90), Some(90)),
    ("bracketleft", 0x005B, Some(91), Some(91), Some(91)),
    ("backslash", 0x005C, Some(92), Some(92), Some(92)),
    ("bracketright", 0x005D, Some(93), Some(93), Some(93)),
    ("asciicircum", 0x005E, Some(94), Some(94), Some(94)),
    ("underscore", 0x005F, Some(95), Some(95), Some(95)),
    ("grave", 0x0060, Some(193), Some(96), Some(96)),
    ("a", 0x0061, Some(97), Some(97), Some(97)),
    ("b", 0x0062, Some(98), Some(98), Some(98)),
    ("c", 0x0063, Some(99), Some(99), Some(99)),
    ("d", 0x0064, Some(100), Some(100), Some(100)),
    ("e", 0x0065, Some(101), Some(101), Some(101)),
    ("f", 0x0066, Some(102), Some(102), Some(102)),
    ("g", 0x0067, Some(103), Some(103), Some(103)),
    ("h", 0x0068, Some(104), Some(104), Some(104)),
    ("i", 0x0069, Some(105), Some(105), Some(105)),
    ("j", 0x006A, Some(106), Some(106), Some(106)),
    ("k", 0x006B, Some(107), Some(107), Some(107)),
    ("l", 0x006C, Some(108), Some(108), Some(108)),
    ("m", 0x006D, Some(109), Some(109), Some(109)),
    ("n", 0x006E, Some(110), Some(110), Some(110)),
    ("o", 0x006F, Some(111), Some(111), Some(111)),
    ("p", 0x0070, Some(112), Some(112), Some(112)),
    ("q", 0x0071, Some(113), Some(113), Some(113)),
    ("r", 0x0072, Some(114), Some(114), Some(114)),
    ("s", 0x0073, Some(115), Some(115), Some(115)),
    ("t", 0x0074, Some(116), Some(116), Some(116)),
    ("u", 0x0075, Some(117), Some(117), Some(117)),
    ("v", 0x0076, Some(118), Some(118), Some(118)),
    ("w", 0x0077, Some(119), Some(119), Some(119)),
    ("x", 0x0078, Some(120), Some(120), Some(120)),
    ("y", 0x0079, Some(121), Some(121), Some(121)),
    ("z", 0x007A, Some(122), Some(122), Some(122)),
    ("braceleft", 0x007B, Some(123), Some(123), Some(123)),
    ("bar", 0x007C, Some(124), Some(124), Some(124)),
    ("braceright", 0x007D, Some(125), Some(125), Some(125)),
    ("asciitilde", 0x007E, Some(126), Some(126), Some(126)),
    ("nbspace", 0x00A0, None, Some(202), Some(160)),
    ("exclamdown", 0x00A1, Some(161), Some(193), Some(161)),
    ("cent", 0x00A2, Some(162), Some(162), Some(162)),
    ("sterling", 0x00A3, Some(163), Some(163), Some(163)),
    ("currency", 0x00A4, Some(168), Some(219), Some(164)),
    ("yen", 0x00A5, Some(165), Some(180), Some(165)),
    ("brokenbar", 0x00A6, None, None, Some(166)),
    ("section", 0x00A7, Some(167), Some(164), Some(167)),
    ("dieresis", 0x00A8, Some(200), Some(172), Some(168)),
    ("copyright", 0x00A9, None, Some(169), Some(169)),
    ("ordfeminine", 0x00AA, Some(227), Some(187), Some(170)),
    ("guillemotleft", 0x00AB, Some(171), Some(199), Some(171)),
    ("logicalnot", 0x00AC, None, Some(194), Some(172)),
    ("registered", 0x00AE, None, Some(168), Some(174)),
    ("macron", 0x00AF, Some(197), Some(248), Some(175)),
    ("degree", 0x00B0, None, Some(161), Some(176)),
    ("plusminus", 0x00B1, None, Some(177), Some(177)),
    ("twosuperior", 0x00B2, None, None, Some(178)),
    ("threesuperior", 0x00B3, None, None, Some(179)),
    ("acute", 0x00B4, Some(194), Some(171), Some(180)),
    ("mu", 0x00B5, None, Some(181), Some(181)),
    ("paragraph", 0x00B6, Some(182), Some(166), Some(182)),
    ("periodcentered", 0x00B7, Some(180), Some(225), Some(183)),
    ("cedilla", 0x00B8, Some(203), Some(252), Some(184)),
    ("onesuperior", 0x00B9, None, None, Some(185)),
    ("ordmasculine", 0x00BA, Some(235), Some(188), Some(186)),
    ("guillemotright", 0x00BB, Some(187), Some(200), Some(187)),
    ("onequarter", 0x00BC, None, None, Some(188)),
    ("onehalf", 0x00BD, None, None, Some(189)),
    ("threequarters", 0x00BE, None, None, Some(190)),
    ("questiondown", 0x00BF, Some(191), Some(192), Some(191)),
    ("Agrave", 0x00C0, None, Some(203), Some(192)),
    ("Aacute", 0x00C1, None, Some(231), Some(193)),
    ("Acircumflex", 0x00C2, None, Some(229), Some(194)),
    ("Atilde", 0x00C3, None, Some(204), Some(195)),
    ("Adieresis", 0x00C4, None, Some(128), Some(196)),
    ("Aring", 0x00C5, None, Some(129), Some(197)),
    ("AE", 0x00C6, Some(225), Some(174), Some(198)),
    ("Ccedilla", 0x00C7, None, Some(130), Some(199)),
    ("Egrave", 0x00C8, None, Some(233), Some(200)),
    ("Eacute", 0x00C9, None, Some(131), Some(201)),
    ("Ecircumflex", 0x00CA, None, Some(230), Some(202)),
    ("Edieresis", 0x00CB, None, Some(232), Some(203)),
    ("Igrave", 0x00CC, None, Some(237), Some(204)),
    ("Iacute", 0x00CD, None, Some(234), Some(205)),
    ("Icircumflex", 0x00CE, None, Some(235), Some(206)),
    ("Idieresis", 0x00CF, None, Some(236), Some(207)),
    ("Eth", 0x00D0, None, None, Some(208)),
    ("Ntilde", 0x00D1, None, Some(132), Some(209)),
    ("Ograve", 0x00D2, None, Some(241), Some(210)),
    ("Oacute", 0x00D3, None, Some(238), Some(211)),
    ("Ocircumflex", 0x00D4, None, Some(239), Some(212)),
    ("Otilde", 0x00D5, None, Some(205), Some(213)),
    ("Odieresis", 0x00D6, None, Some(133), Some(214)),
    ("multiply", 0x00D7, None, None, Some(215)),
    ("Oslash", 0x00D8, Some(233), Some(175), Some(216)),
    ("Ugrave", 0x00D9, None, Some(244), Some(217)),
    ("Uacute", 0x00DA, None, Some(242), Some(218)),
    ("Ucircumflex", 0x00DB, None, Some(243), Some(219)),
    ("Udieresis", 0x00DC, None, Some(134), Some(220)),
    ("Yacute", 0x00DD, None, None, Some(221)),
    ("Thorn", 0x00DE, None, None, Some(222)),
    ("germandbls", 0x00DF, Some(251), Some(167), Some(223)),
    ("agrave", 0x00E0, None, Some(136), Some(224)),
    ("aacute", 0x00E1, None, Some(135), Some(225)),
    ("acircumflex", 0x00E2, None, Some(137), Some(226)),
    ("atilde", 0x00E3, None, Some(139), Some(227)),
    ("adieresis", 0x00E4, None, Some(138), Some(228)),
    ("aring", 0x00E5, None, Some(140), Some(229)),
    ("ae", 0x00E6, Some(241), Some(190), Some(230)),
    ("ccedilla", 0x00E7, None, Some(141), Some(231)),
    ("egrave", 0x00E8, None, Some(143), Some(232)),
    ("eacute", 0x00E9, None, Some(142), Some(233)),
    ("ecircumflex", 0x00EA, None, Some(144), Some(234)),
    ("edieresis", 0x00EB, None, Some(145), Some(235)),
    ("igrave", 0x00EC, None, Some(147), Some(236)),
    ("iacute", 0x00ED, None, Some(146), Some(237)),
    ("icircumflex", 0x00EE, None, Some(148), Some(238)),
    ("idieresis", 0x00EF, None, Some(149), Some(239)),
    ("eth", 0x00F0, None, None, Some(240)),
    ("ntilde", 0x00F1, None, Some(150), Some(241)),
    ("ograve", 0x00F2, None, Some(152), Some(242)),
    ("oacute", 0x00F3, None, Some(151), Some(243)),
    ("ocircumflex", 0x00F4, None, Some(153), Some(244)),
    ("otilde", 0x00F5, None, Some(155), Some(245)),
    ("odieresis", 0x00F6, None, Some(154), Some(246)),
    ("divide", 0x00F7, None, Some(214), Some(247)),
    ("oslash", 0x00F8, Some(249), Some(191), Some(248)),
    ("ugrave", 0x00F9, None, Some(157), Some(249)),
    ("uacute", 0x00FA, None, Some(156), Some(250)),
    ("ucircumflex", 0x00FB, None, Some(158), Some(251)),
    ("udieresis", 0x00FC, None, Some(159), Some(252)),
    ("yacute", 0x00FD, None, None, Some(253)),
    ("thorn", 0x00FE, None, None, Some(254)),
    ("ydieresis", 0x00FF, None, Some(216), Some(255)),
    ("dotlessi", 0x0131, Some(245), Some(245), None),
    ("Lslash", 0x0141, Some(232), None, None),
    ("lslash", 0x0142, Some(248), None, None),
    ("OE", 0x0152, Some(234), Some(206), Some(140)),
    ("oe", 0x0153, Some(250), Some(207), Some(156)),
    ("Scaron", 0x0160, None, None, Some(138)),
    ("scaron", 0x0161, None, None, Some(154)),
    ("Ydieresis", 0x0178, None, Some(217), Some(159)),
    ("Zcaron", 0x017D, None, None, Some(142)),
    ("zcaron", 0x017E, None, None, Some(158)),
    ("florin", 0x0192, Some(166), Some(196), Some(131)),
    ("circumflex", 0x02C6, Some(195), Some(246), Some(136)),
    ("caron", 0x02C7, Some(207), Some(255), None),
    ("breve", 0x02D8, Some(198), Some(249), None),
    ("dotaccent", 0x02D9, Some(199), Some(250), None),
    ("ring", 0x02DA, Some(202), Some(251), None),
    ("ogonek", 0x02DB, Some(206), Some(254), None),
    ("tilde", 0x02DC, Some(196), Some(247), Some(152)),
    ("hungarumlaut", 0x02DD, Some(205), Some(253), None),
    ("endash", 0x2013, Some(177), Some(208), Some(150)),
    ("emdash", 0x2014, Some(208), Some(209), Some(151)),
    ("quoteleft", 0x2018, Some(96), Some(212), Some(145)),
    ("quoteright", 0x2019, Some(39), Some(213), Some(146)),
    ("quotesinglbase", 0x201A, Some(184), Some(226), Some(130)),
    ("quotedblleft", 0x201C, Some(170), Some(210), Some(147)),
    ("quotedblright", 0x201D, Some(186), Some(211), Some(148)),
    ("quotedblbase", 0x201E, Some(185), Some(227), Some(132)),
    ("dagger", 0x2020, Some(178), Some(160), Some(134)),
    ("daggerdbl", 0x2021, Some(179), Some(224), Some(135)),
    ("bullet", 0x2022, Some(183), Some(165), Some(149)),
    ("ellipsis", 0x2026, Some(188), Some(201), Some(133)),
    ("perthousand", 0x2030, Some(189), Some(228), Some(137)),
    ("guilsinglleft", 0x2039, Some(172), Some(220), Some(139)),
    ("guilsinglright", 0x203A, Some(173), Some(221), Some(155)),
    ("fraction", 0x2044, Some(164), Some(218), None),
    ("Euro", 0x20AC, None, None, Some(128)),
    ("trademark", 0x2122, None, Some(170), Some(153)),
    ("minus", 0x2212, None, None, None),
    ("fi", 0xFB01, Some(174), Some(222), None),
    ("fl", 0xFB02, Some(175), Some(223), None),
];

pub type EncodingTable = [Option<&'static str>; 256];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaseEncoding {
    Standard,
    MacRoman,
    WinAnsi,
}

static TABLES: LazyLock<[EncodingTable; 3]> = LazyLock::new(|| {
    let mut tables = [[None; 256]; 3];
    for &(name, _, standard, mac, win) in LATIN_CHARSET {
        for (table, code) in tables.iter_mut().zip([standard, mac, win]) {
            if let Some(code) = code {
                table[code as usize] = Some(name);
            }
        }
    }
    // WinAnsi repeats these two glyphs at other positions.
    tables[2][0xA0] = Some("space");
    tables[2][0xAD] = Some("hyphen");
    tables
});

static NAME_TO_UNICODE: LazyLock<FxHashMap<&'static str, char>> = LazyLock::new(|| {
    LATIN_CHARSET
        .iter()
        .filter_map(|&(name, unicode, ..)| Some((name, char::from_u32(u32::from(unicode))?)))
        .collect()
});

impl BaseEncoding {
    /// Maps an `/Encoding` or `/BaseEncoding` name. MacExpertEncoding and
    /// unknown names are not supported and give `None`.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "StandardEncoding" => Some(BaseEncoding::Standard),
            "MacRomanEncoding" => Some(BaseEncoding::MacRoman),
            "WinAnsiEncoding" => Some(BaseEncoding::WinAnsi),
            _ => None,
        }
    }

    pub fn table(self) -> &'static EncodingTable {
        &TABLES[self as usize]
    }

    pub fn glyph_name(self, code: u8) -> Option<&'static str> {
        self.table()[code as usize]
    }
}

/// Unicode value of a glyph name: the Latin character set first, then the
/// `uniXXXX` and `uXXXX[XX]` forms.
pub fn glyph_name_to_unicode(name: &str) -> Option<char> {
    if let Some(ch) = NAME_TO_UNICODE.get(name) {
        return Some(*ch);
    }
    // Suffixes like ".sc" or "_alt" name variants of the same character.
    let base = name.split(['.', '_']).next().unwrap_or(name);
    if base != name && !base.is_empty() {
        return glyph_name_to_unicode(base);
    }
    let hex = name
        .strip_prefix("uni")
        .filter(|h| h.len() == 4)
        .or_else(|| name.strip_prefix('u').filter(|h| (4..=6).contains(&h.len())))?;
    if !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    char::from_u32(u32::from_str_radix(hex, 16).ok()?)
}
