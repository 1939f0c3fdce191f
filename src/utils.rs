/// Formats `buffer` as a hex dump, labelling lines from `start`.
///
/// `marks` flags bytes to highlight; flagged bytes are preceded by `*`
/// instead of a space.
pub fn hexdump(buffer: &[u8], start: u16, marks: &[bool]) -> String {
    let mut str = String::new();

    for (line_no, chunk) in buffer.chunks(16).enumerate() {
        let line_offset = line_no * 16;
        let addr = start.wrapping_add(line_offset as u16);
        let mut line = format!("{:04x}:", addr);
        let mut chars = String::new();

        for (i, &byte) in chunk.iter().enumerate() {
            let marked = marks.get(line_offset + i).copied().unwrap_or(false);
            line.push_str(&format!("{}{:02x}", if marked { '*' } else { ' ' }, byte));

            let c = byte as char;
            chars.push(if c.is_ascii_graphic() || c == ' ' {
                c
            } else {
                '.'
            });
        }

        let dump_line = format!("{:<54} {}\n", line, chars);
        str.push_str(&dump_line);
    }

    str
}
