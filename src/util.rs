use crate::options::Codec;

// Full-width look-alikes that are themselves legal on every common filesystem.
const RESERVED_REPLACEMENTS: [(char, char); 9] = [
    ('\\', '＼'),
    ('/', '⧸'),
    (':', '：'),
    ('*', '＊'),
    ('?', '？'),
    ('"', '＂'),
    ('<', '＜'),
    ('>', '＞'),
    ('|', '｜'),
];

/// Replace filesystem-reserved characters with visually similar substitutes.
///
/// No truncation is performed; callers that need a length bound apply one themselves.
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| {
            RESERVED_REPLACEMENTS
                .iter()
                .find(|(reserved, _)| *reserved == c)
                .map(|(_, replacement)| *replacement)
                .unwrap_or(c)
        })
        .collect()
}

/// Name of the file an extraction of `title` with `codec` produces.
pub fn output_filename(title: &str, codec: Codec) -> String {
    sanitize_filename(&format!("{}.{}", title, codec.extension()))
}

/// yt-dlp expands `%(field)s` in `-o`; literal text must have its `%` doubled.
pub fn escape_output_template(s: &str) -> String {
    s.replace('%', "%%")
}
