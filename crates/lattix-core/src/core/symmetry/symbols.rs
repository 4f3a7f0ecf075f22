use phf::{Map, phf_map};

/// Hermann-Mauguin symbol to minimal generator string, in Jones faithful
/// notation. Generators are semicolon-separated and never include the
/// identity; centred lattices carry their centring translations as explicit
/// generators. The table covers the standard-setting space groups across
/// all seven crystal systems and is append-only literal data. Values are
/// stored verbatim, surrounding whitespace included, and are reported back
/// unchanged by the group that parses them.
pub static SPACE_GROUP_GENERATORS: Map<&'static str, &'static str> = phf_map! {
    // Triclinic
    "P 1" => "x,y,z",
    "P -1" => "-x,-y,-z",
    // Monoclinic (unique axis b)
    "P 2" => "-x,y,-z",
    "P 21" => "-x,y+1/2,-z",
    "C 2" => "x+1/2,y+1/2,z; -x,y,-z",
    "P m" => "x,-y,z",
    "P c" => "x,-y,z+1/2",
    "C m" => "x+1/2,y+1/2,z; x,-y,z",
    "C c" => "x+1/2,y+1/2,z; x,-y,z+1/2",
    "P 2/m" => "-x,y,-z; -x,-y,-z",
    "P 21/m" => "-x,y+1/2,-z; -x,-y,-z",
    "C 2/m" => "x+1/2,y+1/2,z; -x,y,-z; -x,-y,-z",
    "P 2/c" => "-x,y,-z+1/2; -x,-y,-z",
    "P 21/c" => "-x,y+1/2,-z+1/2; -x,-y,-z",
    "P 21/n" => "-x+1/2,y+1/2,-z+1/2; -x,-y,-z",
    "C 2/c" => "x+1/2,y+1/2,z; -x,y,-z+1/2; -x,-y,-z",
    // Orthorhombic
    "P 2 2 2" => "-x,-y,z; -x,y,-z",
    "P 2 2 21" => "-x,-y,z+1/2; x,-y,-z",
    "P 21 21 2" => "-x,-y,z; -x+1/2,y+1/2,-z",
    "P 21 21 21" => "-x+1/2,-y,z+1/2; -x,y+1/2,-z+1/2",
    "C 2 2 21" => "x+1/2,y+1/2,z; -x,-y,z+1/2; x,-y,-z",
    "C 2 2 2" => "x+1/2,y+1/2,z; -x,-y,z; -x,y,-z",
    "F 2 2 2" => "x,y+1/2,z+1/2; x+1/2,y,z+1/2; -x,-y,z; -x,y,-z",
    "I 2 2 2" => "x+1/2,y+1/2,z+1/2; -x,-y,z; -x,y,-z",
    "P m m 2" => "-x,-y,z; x,-y,z",
    "P m c 21" => "-x,-y,z+1/2; x,-y,z+1/2",
    "C m c 21" => "x+1/2,y+1/2,z; -x,-y,z+1/2; x,-y,z+1/2",
    "P n a 21" => "-x,-y,z+1/2; x+1/2,-y+1/2,z",
    "C m m 2" => "x+1/2,y+1/2,z; -x,-y,z; x,-y,z",
    "A m m 2" => "x,y+1/2,z+1/2; -x,-y,z; x,-y,z",
    "F m m 2" => "x,y+1/2,z+1/2; x+1/2,y,z+1/2; -x,-y,z; x,-y,z",
    "I m m 2" => "x+1/2,y+1/2,z+1/2; -x,-y,z; x,-y,z",
    "F d d 2" => "x,y+1/2,z+1/2; x+1/2,y,z+1/2; -x,-y,z; x+1/4,-y+1/4,z+1/4",
    "P m m m" => "-x,-y,z; -x,y,-z; -x,-y,-z",
    "P b c n" => "-x+1/2,-y+1/2,z+1/2; -x,y,-z+1/2; -x,-y,-z",
    "P b c a" => "-x+1/2,-y,z+1/2; -x,y+1/2,-z+1/2; -x,-y,-z",
    "P n m a" => " -x+1/2,-y,z+1/2; -x,y+1/2,-z; -x,-y,-z",
    "C m c m" => "x+1/2,y+1/2,z; -x,-y,z+1/2; x,-y,-z; -x,-y,-z",
    "I m m m" => "x+1/2,y+1/2,z+1/2; -x,-y,z; -x,y,-z; -x,-y,-z",
    "F m m m" => "x,y+1/2,z+1/2; x+1/2,y,z+1/2; -x,-y,z; -x,y,-z; -x,-y,-z",
    // Tetragonal
    "P 4" => "-y,x,z",
    "P 41" => "-y,x,z+1/4",
    "P 42" => "-y,x,z+1/2",
    "P 43" => "-y,x,z+3/4",
    "I 4" => "x+1/2,y+1/2,z+1/2; -y,x,z",
    "I 41" => "x+1/2,y+1/2,z+1/2; -y,x+1/2,z+1/4",
    "P -4" => "y,-x,-z",
    "I -4" => "x+1/2,y+1/2,z+1/2; y,-x,-z",
    "P 4/m" => "-y,x,z; -x,-y,-z",
    "P 42/m" => "-y,x,z+1/2; -x,-y,-z",
    "P 42/n" => "-y,x+1/2,z+1/2; -x,-y,-z",
    "I 4/m" => "x+1/2,y+1/2,z+1/2; -y,x,z; -x,-y,-z",
    "I 41/a" => "x+1/2,y+1/2,z+1/2; -y+3/4,x+1/4,z+1/4; -x,-y,-z",
    "P 4 2 2" => "-y,x,z; x,-y,-z",
    "P 41 2 2" => "-y,x,z+1/4; x,-y,-z+1/2",
    "P 41 21 2" => "-y+1/2,x+1/2,z+1/4; y,x,-z",
    "P 43 2 2" => "-y,x,z+3/4; x,-y,-z+1/2",
    "P 43 21 2" => "-y+1/2,x+1/2,z+3/4; y,x,-z",
    "P 4 m m" => "-y,x,z; x,-y,z",
    "P -4 2 m" => "y,-x,-z; x,-y,-z",
    "P -4 m 2" => "y,-x,-z; -x,y,z",
    "P 4/m m m" => "-y,x,z; x,-y,z; -x,-y,-z",
    "I 4/m m m" => "x+1/2,y+1/2,z+1/2; -y,x,z; x,-y,z; -x,-y,-z",
    "P 42/m n m" => "-y+1/2,x+1/2,z+1/2; -x+1/2,y+1/2,-z+1/2; -x,-y,-z",
    // Trigonal (hexagonal axes for R groups)
    "P 3" => "-y,x-y,z",
    "P 31" => "-y,x-y,z+1/3",
    "P 32" => "-y,x-y,z+2/3",
    "R 3" => "x+2/3,y+1/3,z+1/3; -y,x-y,z",
    "P -3" => "-y,x-y,z; -x,-y,-z",
    "R -3" => "x+2/3,y+1/3,z+1/3; -y,x-y,z; -x,-y,-z",
    "P 3 1 2" => "-y,x-y,z; -y,-x,-z",
    "P 3 2 1" => "-y,x-y,z; y,x,-z",
    "P 31 2 1" => "-y,x-y,z+1/3; y,x,-z",
    "P 32 2 1" => "-y,x-y,z+2/3; y,x,-z",
    "P 3 m 1" => "-y,x-y,z; -y,-x,z",
    "P 3 1 m" => "-y,x-y,z; y,x,z",
    "P 3 c 1" => "-y,x-y,z; -y,-x,z+1/2",
    "P 3 1 c" => "-y,x-y,z; y,x,z+1/2",
    "P -3 m 1" => "-y,x-y,z; y,x,-z; -x,-y,-z",
    "P -3 1 m" => "-y,x-y,z; -y,-x,-z; -x,-y,-z",
    "P -3 c 1" => "-y,x-y,z; y,x,-z+1/2; -x,-y,-z",
    "R 3 m" => "x+2/3,y+1/3,z+1/3; -y,x-y,z; -y,-x,z",
    "R 3 c" => "x+2/3,y+1/3,z+1/3; -y,x-y,z; -y,-x,z+1/2",
    "R -3 m" => "x+2/3,y+1/3,z+1/3; -y,x-y,z; y,x,-z; -x,-y,-z",
    "R -3 c" => "x+2/3,y+1/3,z+1/3; -y,x-y,z; y,x,-z+1/2; -x,-y,-z",
    // Hexagonal
    "P 6" => "x-y,x,z",
    "P 61" => "x-y,x,z+1/6",
    "P 65" => "x-y,x,z+5/6",
    "P 62" => "x-y,x,z+1/3",
    "P 64" => "x-y,x,z+2/3",
    "P 63" => "x-y,x,z+1/2",
    "P -6" => "-x+y,-x,-z",
    "P 6/m" => "x-y,x,z; -x,-y,-z",
    "P 63/m" => "x-y,x,z+1/2; -x,-y,-z",
    "P 6 2 2" => "x-y,x,z; y,x,-z",
    "P 61 2 2" => "x-y,x,z+1/6; y,x,-z+1/3",
    "P 65 2 2" => "x-y,x,z+5/6; y,x,-z+2/3",
    "P 6 m m" => "x-y,x,z; -y,-x,z",
    "P 6 c c" => "x-y,x,z; -y,-x,z+1/2",
    "P 63 m c" => "x-y,x,z+1/2; -y,-x,z",
    "P -6 m 2" => "-x+y,-x,-z; -y,-x,z",
    "P -6 2 m" => "-x+y,-x,-z; y,x,-z",
    "P 6/m m m" => "x-y,x,z; y,x,-z; -x,-y,-z",
    "P 63/m m c" => "x-y,x,z+1/2; y,x,-z; -x,-y,-z",
    // Cubic
    "P 2 3" => "-x,-y,z; -x,y,-z; z,x,y",
    "F 2 3" => "x,y+1/2,z+1/2; x+1/2,y,z+1/2; -x,-y,z; -x,y,-z; z,x,y",
    "I 2 3" => "x+1/2,y+1/2,z+1/2; -x,-y,z; -x,y,-z; z,x,y",
    "P 21 3" => "-x+1/2,-y,z+1/2; -x,y+1/2,-z+1/2; z,x,y",
    "I 21 3" => "x+1/2,y+1/2,z+1/2; -x+1/2,-y,z+1/2; -x,y+1/2,-z+1/2; z,x,y",
    "P m -3" => "-x,-y,z; -x,y,-z; z,x,y; -x,-y,-z",
    "I m -3" => "x+1/2,y+1/2,z+1/2; -x,-y,z; -x,y,-z; z,x,y; -x,-y,-z",
    "F m -3" => "x,y+1/2,z+1/2; x+1/2,y,z+1/2; -x,-y,z; -x,y,-z; z,x,y; -x,-y,-z",
    "F d -3" => "x,y+1/2,z+1/2; x+1/2,y,z+1/2; -x,-y,z; -x,y,-z; z,x,y; -x+1/4,-y+1/4,-z+1/4",
    "P a -3" => "-x+1/2,-y,z+1/2; -x,y+1/2,-z+1/2; z,x,y; -x,-y,-z",
    "P 4 3 2" => "-y,x,z; z,x,y",
    "P 42 3 2" => "-y+1/2,x+1/2,z+1/2; z,x,y",
    "F 4 3 2" => "x,y+1/2,z+1/2; x+1/2,y,z+1/2; -y,x,z; z,x,y",
    "I 4 3 2" => "x+1/2,y+1/2,z+1/2; -y,x,z; z,x,y",
    "P -4 3 m" => "y,-x,-z; z,x,y",
    "F -4 3 m" => "x,y+1/2,z+1/2; x+1/2,y,z+1/2; y,-x,-z; z,x,y",
    "I -4 3 m" => "x+1/2,y+1/2,z+1/2; y,-x,-z; z,x,y",
    "P m -3 m" => "-y,x,z; z,x,y; -x,-y,-z",
    "P m -3 n" => "-y+1/2,x+1/2,z+1/2; z,x,y; -x,-y,-z",
    "F m -3 m" => "x,y+1/2,z+1/2; x+1/2,y,z+1/2; -y,x,z; z,x,y; -x,-y,-z",
    // Diamond glide, origin at -43m; the inversion sits at (1/8,1/8,1/8).
    "F d -3 m" => "x,y+1/2,z+1/2; x+1/2,y,z+1/2; y,-x,-z; z,x,y; -x+1/4,-y+1/4,-z+1/4",
    "I m -3 m" => "x+1/2,y+1/2,z+1/2; -y,x,z; z,x,y; -x,-y,-z",
    "I a -3 d" => "x+1/2,y+1/2,z+1/2; -x+1/2,-y,z+1/2; -x,y+1/2,-z+1/2; z,x,y; y+3/4,x+1/4,-z+1/4; -x,-y,-z",
};

/// Looks up a symbol, first verbatim (with whitespace runs collapsed), then
/// with the redundant "1" separators of the short symbol stripped.
///
/// Triclinic symbols and the trigonal families keep their "1" tokens: for
/// those, the position of the "1" distinguishes settings (`P 3 1 m` and
/// `P 3 m 1` are different groups), so they are matched verbatim only.
pub fn lookup(symbol: &str) -> Option<(&'static str, &'static str)> {
    let normalized = collapse_whitespace(symbol);
    if let Some((key, generators)) = SPACE_GROUP_GENERATORS.entries().find(|(k, _)| **k == normalized)
    {
        return Some((key, generators));
    }

    let stripped = strip_unit_separators(&normalized)?;
    SPACE_GROUP_GENERATORS
        .entries()
        .find(|(key, _)| strip_unit_separators(key).as_deref() == Some(stripped.as_str()))
        .map(|(key, generators)| (*key, *generators))
}

fn collapse_whitespace(symbol: &str) -> String {
    symbol.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Removes standalone "1" tokens; returns `None` for symbols where the "1"
/// is structurally meaningful and must be preserved verbatim.
fn strip_unit_separators(symbol: &str) -> Option<String> {
    let tokens: Vec<&str> = symbol.split(' ').collect();
    if tokens.len() < 2 {
        return None;
    }
    // Triclinic: "P 1" / "P -1" are nothing but their "1".
    if tokens.len() == 2 && matches!(tokens[1], "1" | "-1") {
        return None;
    }
    // Trigonal: the "1" placement selects the setting.
    if tokens[1].starts_with('3') || tokens[1].starts_with("-3") {
        return None;
    }
    let kept: Vec<&str> = tokens
        .iter()
        .enumerate()
        .filter(|&(i, t)| i == 0 || *t != "1")
        .map(|(_, t)| *t)
        .collect();
    if kept.len() == tokens.len() {
        return None;
    }
    Some(kept.join(" "))
}
