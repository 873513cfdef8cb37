use std::fmt;

/// The seven instructions of the tape machine.
///
/// Codes are written as two-digit hex literals in program text (`0x01`).
/// Lookup is case-insensitive; display always uses the uppercased form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Nop = 0x00,
    Take = 0x01,
    Next = 0x02,
    Print = 0x03,
    Send = 0x04,
    Clr = 0x05,
    Halt = 0xFF,
}

impl Opcode {
    /// Every opcode in catalog order.
    pub const ALL: [Opcode; 7] = [
        Opcode::Nop,
        Opcode::Take,
        Opcode::Next,
        Opcode::Print,
        Opcode::Send,
        Opcode::Clr,
        Opcode::Halt,
    ];

    /// The canonical lowercase code string, as matched against tokens.
    pub fn code(self) -> &'static str {
        match self {
            Opcode::Nop => "0x00",
            Opcode::Take => "0x01",
            Opcode::Next => "0x02",
            Opcode::Print => "0x03",
            Opcode::Send => "0x04",
            Opcode::Clr => "0x05",
            Opcode::Halt => "0xff",
        }
    }

    /// Symbolic mnemonic.
    pub fn name(self) -> &'static str {
        match self {
            Opcode::Nop => "NOP",
            Opcode::Take => "TAKE",
            Opcode::Next => "NEXT",
            Opcode::Print => "PRINT",
            Opcode::Send => "SEND",
            Opcode::Clr => "CLR",
            Opcode::Halt => "HALT",
        }
    }

    /// Resolve a program token. Returns `None` for anything outside the catalog.
    pub fn from_token(token: &str) -> Option<Opcode> {
        let lower = token.to_lowercase();
        Opcode::ALL.into_iter().find(|op| op.code() == lower)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code().to_uppercase())
    }
}

/// Language used for labels, descriptions and history lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Locale {
    #[default]
    En,
    Es,
}

/// A resolved catalog row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entry {
    pub opcode: Opcode,
    pub name: &'static str,
    pub label: &'static str,
    pub description: &'static str,
}

/// What a single step did, in a form the catalog can put into words.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Note<'a> {
    Waiting,
    Took { letter: char, buffer: &'a str },
    PointerOutOfRange,
    Moved { pointer: usize },
    AlreadyAtEnd,
    Printed { buffer: &'a str },
    Sent { buffer: &'a str },
    Cleared { previous: &'a str },
    Terminated,
    Unknown { token: &'a str },
}

/// The immutable opcode table, bound to a locale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Catalog {
    locale: Locale,
}

impl Catalog {
    pub fn new(locale: Locale) -> Self {
        Self { locale }
    }

    pub fn locale(&self) -> Locale {
        self.locale
    }

    /// Look up a raw token. Unknown tokens are an expected outcome, not an error.
    pub fn lookup(&self, token: &str) -> Option<Entry> {
        Opcode::from_token(token).map(|op| self.entry(op))
    }

    pub fn entry(&self, opcode: Opcode) -> Entry {
        let (label, description) = match (self.locale, opcode) {
            (Locale::En, Opcode::Nop) => ("No operation", "Do nothing (wait)"),
            (Locale::En, Opcode::Take) => ("Take", "Take the current letter and append it to the buffer"),
            (Locale::En, Opcode::Next) => ("Next", "Move the pointer to the next letter"),
            (Locale::En, Opcode::Print) => ("Print", "Show the buffer contents"),
            (Locale::En, Opcode::Send) => ("Send", "Hand the buffer to the receiver"),
            (Locale::En, Opcode::Clr) => ("Clear", "Clear the buffer"),
            (Locale::En, Opcode::Halt) => ("Halt", "Stop execution"),
            (Locale::Es, Opcode::Nop) => ("Sin operación", "No hacer nada (espera)"),
            (Locale::Es, Opcode::Take) => ("Tomar", "Tomar letra actual y añadir al buffer"),
            (Locale::Es, Opcode::Next) => ("Siguiente", "Mover puntero a siguiente letra"),
            (Locale::Es, Opcode::Print) => ("Imprimir", "Mostrar contenido del buffer"),
            (Locale::Es, Opcode::Send) => ("Enviar", "Entregar buffer al receptor"),
            (Locale::Es, Opcode::Clr) => ("Limpiar", "Limpiar el buffer"),
            (Locale::Es, Opcode::Halt) => ("Alto", "Terminar ejecución"),
        };
        Entry {
            opcode,
            name: opcode.name(),
            label,
            description,
        }
    }

    /// All rows in catalog order, for reference tables.
    pub fn entries(&self) -> impl Iterator<Item = Entry> + '_ {
        Opcode::ALL.into_iter().map(|op| self.entry(op))
    }

    /// Placeholder shown for tokens outside the catalog.
    pub fn unknown_label(&self) -> &'static str {
        match self.locale {
            Locale::En => "Unknown",
            Locale::Es => "Desconocido",
        }
    }

    /// Word a step for the execution history, without the `[CODE]` prefix.
    pub fn history_line(&self, note: Note<'_>) -> String {
        match (self.locale, note) {
            (Locale::En, Note::Waiting) => "Waiting...".to_string(),
            (Locale::En, Note::Took { letter, buffer }) => {
                format!("Took letter \"{letter}\" → buffer: \"{buffer}\"")
            }
            (Locale::En, Note::PointerOutOfRange) => "ERROR: pointer out of range".to_string(),
            (Locale::En, Note::Moved { pointer }) => format!("Pointer moved to position {pointer}"),
            (Locale::En, Note::AlreadyAtEnd) => "WARNING: already at the last position".to_string(),
            (Locale::En, Note::Printed { buffer }) => format!("Printed to the board: \"{buffer}\""),
            (Locale::En, Note::Sent { buffer }) => format!("Buffer sent to the receiver: \"{buffer}\""),
            (Locale::En, Note::Cleared { previous }) => {
                format!("Buffer cleared (contained: \"{previous}\")")
            }
            (Locale::En, Note::Terminated) => "Program terminated".to_string(),
            (Locale::En, Note::Unknown { token }) => format!("Unknown code: {token}"),
            (Locale::Es, Note::Waiting) => "Esperando...".to_string(),
            (Locale::Es, Note::Took { letter, buffer }) => {
                format!("Tomada letra \"{letter}\" → Buffer: \"{buffer}\"")
            }
            (Locale::Es, Note::PointerOutOfRange) => "ERROR: Puntero fuera de rango".to_string(),
            (Locale::Es, Note::Moved { pointer }) => format!("Puntero movido a posición {pointer}"),
            (Locale::Es, Note::AlreadyAtEnd) => "ADVERTENCIA: Ya en la última posición".to_string(),
            (Locale::Es, Note::Printed { buffer }) => format!("Impreso en pizarra: \"{buffer}\""),
            (Locale::Es, Note::Sent { buffer }) => format!("Buffer enviado al receptor: \"{buffer}\""),
            (Locale::Es, Note::Cleared { previous }) => {
                format!("Buffer limpiado (contenía: \"{previous}\")")
            }
            (Locale::Es, Note::Terminated) => "Programa terminado".to_string(),
            (Locale::Es, Note::Unknown { token }) => format!("Código desconocido: {token}"),
        }
    }

    /// Render the reference table, one row per opcode.
    pub fn reference_table(&self) -> String {
        use std::fmt::Write;
        let mut out = String::new();
        for e in self.entries() {
            let _ = writeln!(
                out,
                "{:<5} {:<6} {:<14} {}",
                e.opcode.to_string(),
                e.name,
                e.label,
                e.description
            );
        }
        out
    }
}
